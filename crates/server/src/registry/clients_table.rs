//! The AmneziaWG `clientsTable` JSON: maps peer public keys to client names.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEntry {
    pub client_id: String,
    pub user_data: ClientUserData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientUserData {
    pub client_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    // Fields written by the Amnezia client apps are kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientsTable {
    entries: Vec<ClientEntry>,
}

impl ClientsTable {
    /// An empty or blank file is an empty table.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(Self {
            entries: serde_json::from_str(text)?,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.entries)
    }

    pub fn name_for(&self, public_key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.client_id == public_key)
            .map(|entry| entry.user_data.client_name.as_str())
    }

    pub fn key_for(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.user_data.client_name == name)
            .map(|entry| entry.client_id.as_str())
    }

    /// Names `public_key`, adding an entry when it has none.
    pub fn upsert(&mut self, public_key: &str, name: &str) {
        match self.entries.iter_mut().find(|entry| entry.client_id == public_key) {
            Some(entry) => entry.user_data.client_name = name.to_string(),
            None => self.entries.push(ClientEntry {
                client_id: public_key.to_string(),
                user_data: ClientUserData {
                    client_name: name.to_string(),
                    creation_date: Some(Utc::now().to_rfc2822()),
                    extra: Map::new(),
                },
            }),
        }
    }

    pub fn remove_key(&mut self, public_key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.client_id != public_key);
        self.entries.len() != before
    }
}
