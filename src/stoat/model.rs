use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `GET /servers/{id}` — only the fields the cloner needs.
#[derive(Deserialize, Debug)]
pub struct Server {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub roles: HashMap<String, ServerRole>,
}

#[derive(Deserialize, Debug)]
pub struct ServerRole {
    pub name: String,
}

/// One entry of `GET /servers/{id}/channels`.
#[derive(Deserialize, Debug)]
pub struct Channel {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// `POST /servers/{id}/roles` body. Permissions are an `[allow, deny]` pair.
#[derive(Serialize, Debug)]
pub struct NewRole {
    pub name: String,
    pub permissions: [u64; 2],
    pub colour: Option<String>,
    pub hoist: bool,
}

#[derive(Deserialize, Debug)]
pub struct CreatedRole {
    pub id: String,
}

/// `POST /servers/{id}/channels` body.
#[derive(Serialize, Debug)]
pub struct NewChannel {
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: &'static str,
    pub description: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct CreatedChannel {
    #[serde(rename = "_id")]
    pub id: String,
}

/// One category in the `PATCH /servers/{id}` hierarchy update.
#[derive(Serialize, Debug, Clone)]
pub struct Category {
    pub id: String,
    pub title: String,
    pub channels: Vec<String>,
}

/// Response of a content-store upload.
#[derive(Deserialize, Debug)]
pub struct UploadedFile {
    pub id: String,
}
