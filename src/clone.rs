//! Replicates the source server's role and channel hierarchy on the
//! destination before messages move. Reconciliation is idempotent by name:
//! a same-named destination role/channel is reused instead of recreated, so
//! re-running a clone against the same server creates nothing twice.
use anyhow::Result;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::StructureMapping;
use crate::report::ProgressSink;
use crate::source::{SourceChannel, SourceChannelKind, SourceStructure};
use crate::stoat::model::{Category, NewChannel, NewRole};
use crate::stoat::StoatApi;

/// Source capability bit → destination permission bit.
const PERMISSION_TABLE: &[(u64, u32)] = &[
    (1 << 10, 20), // view channel
    (1 << 11, 22), // send messages
    (1 << 13, 24), // manage messages
    (1 << 4, 2),   // manage channels
    (1 << 28, 3),  // manage roles
    (1 << 20, 30), // connect
    (1 << 21, 31), // speak
];

/// Title of the synthetic category collecting channels without one.
const UNCATEGORIZED_TITLE: &str = "Channels";

/// Translate a source permission bitmask into the destination's bit layout.
/// Capabilities without a table entry are dropped silently.
pub fn map_permissions(source_bits: u64) -> u64 {
    PERMISSION_TABLE
        .iter()
        .filter(|(source_bit, _)| source_bits & source_bit != 0)
        .fold(0, |acc, (_, dest_bit)| acc | (1 << dest_bit))
}

fn colour_hex(color: u32) -> Option<String> {
    (color != 0).then(|| format!("#{color:06x}"))
}

/// Freshly generated short category identifier; the source's category id is
/// never reused on the destination.
fn short_category_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

pub struct Cloner<'a> {
    api: &'a dyn StoatApi,
    sink: &'a dyn ProgressSink,
    target_server_id: &'a str,
    dry_run: bool,
    mapping: StructureMapping,
}

impl<'a> Cloner<'a> {
    pub fn new(
        api: &'a dyn StoatApi,
        sink: &'a dyn ProgressSink,
        target_server_id: &'a str,
        dry_run: bool,
    ) -> Self {
        Self {
            api,
            sink,
            target_server_id,
            dry_run,
            mapping: StructureMapping::default(),
        }
    }

    pub async fn run(mut self, structure: &SourceStructure) -> Result<StructureMapping> {
        self.sink.emit(&format!(
            "Cloning structure of '{}' ({} roles, {} channels)",
            structure.server_name,
            structure.roles.len(),
            structure.channels.len()
        ));

        let server = self.api.fetch_server(self.target_server_id).await?;
        let existing_roles: HashMap<String, String> = server
            .roles
            .iter()
            .map(|(id, role)| (role.name.to_lowercase(), id.clone()))
            .collect();

        let existing_channels: HashMap<String, String> = self
            .api
            .fetch_server_channels(self.target_server_id)
            .await?
            .into_iter()
            .map(|c| (c.name.to_lowercase(), c.id))
            .collect();

        self.clone_roles(structure, &existing_roles).await;
        self.clone_channels(structure, &existing_channels).await?;

        self.sink.emit("Structure cloning finished.");
        Ok(self.mapping)
    }

    async fn clone_roles(&mut self, structure: &SourceStructure, existing: &HashMap<String, String>) {
        let mut roles: Vec<_> = structure.roles.iter().filter(|r| !r.is_default).collect();
        roles.sort_by_key(|r| r.position);

        for role in roles {
            let name_lower = role.name.to_lowercase();
            if let Some(id) = existing.get(&name_lower) {
                info!(role = %role.name, "role already exists, reusing");
                self.mapping.roles.insert(role.id.clone(), id.clone());
                continue;
            }

            if self.dry_run {
                self.sink
                    .emit(&format!("[DRY RUN] Would create role: {}", role.name));
                self.mapping
                    .roles
                    .insert(role.id.clone(), format!("dry_run_role_{}", role.id));
                continue;
            }

            let payload = NewRole {
                name: role.name.clone(),
                permissions: [map_permissions(role.permissions), 0],
                colour: colour_hex(role.color),
                hoist: role.hoist,
            };
            match self.api.create_role(self.target_server_id, &payload).await {
                Ok(created) => {
                    self.sink.emit(&format!("Created role: {}", role.name));
                    self.mapping.roles.insert(role.id.clone(), created.id);
                }
                Err(err) => {
                    warn!(role = %role.name, %err, "failed to create role, skipping");
                }
            }
        }
    }

    async fn clone_channels(
        &mut self,
        structure: &SourceStructure,
        existing: &HashMap<String, String>,
    ) -> Result<()> {
        let mut categories: Vec<&SourceChannel> = structure
            .channels
            .iter()
            .filter(|c| c.kind == SourceChannelKind::Category)
            .collect();
        categories.sort_by_key(|c| c.position);

        let mut dest_categories: Vec<Category> = Vec::new();

        for category in &categories {
            let members = self.children_of(structure, Some(&category.id));
            let channel_ids = self.resolve_channels(&members, existing, &category.name).await;
            if !channel_ids.is_empty() {
                dest_categories.push(Category {
                    id: short_category_id(),
                    title: category.name.clone(),
                    channels: channel_ids,
                });
            }
        }

        let lonely = self.children_of(structure, None);
        if !lonely.is_empty() {
            let channel_ids = self
                .resolve_channels(&lonely, existing, UNCATEGORIZED_TITLE)
                .await;
            if !channel_ids.is_empty() {
                dest_categories.push(Category {
                    id: short_category_id(),
                    title: UNCATEGORIZED_TITLE.to_string(),
                    channels: channel_ids,
                });
            }
        }

        if dest_categories.is_empty() {
            return Ok(());
        }
        if self.dry_run {
            self.sink.emit(&format!(
                "[DRY RUN] Would sync {} categories with the destination server.",
                dest_categories.len()
            ));
            return Ok(());
        }

        self.sink.emit("Syncing server category structure...");
        self.api
            .update_categories(self.target_server_id, &dest_categories)
            .await?;
        Ok(())
    }

    /// Migratable (text/voice) channels under a category, in position order.
    fn children_of<'s>(
        &self,
        structure: &'s SourceStructure,
        parent_id: Option<&str>,
    ) -> Vec<&'s SourceChannel> {
        let mut members: Vec<&SourceChannel> = structure
            .channels
            .iter()
            .filter(|c| {
                matches!(c.kind, SourceChannelKind::Text | SourceChannelKind::Voice)
                    && c.parent_id.as_deref() == parent_id
            })
            .collect();
        members.sort_by_key(|c| c.position);
        members
    }

    async fn resolve_channels(
        &mut self,
        members: &[&SourceChannel],
        existing: &HashMap<String, String>,
        category_name: &str,
    ) -> Vec<String> {
        let mut ids = Vec::new();
        for channel in members {
            let name_lower = channel.name.to_lowercase();
            if let Some(id) = existing.get(&name_lower) {
                info!(channel = %channel.name, "channel already exists, reusing");
                self.mapping.channels.insert(channel.id.clone(), id.clone());
                ids.push(id.clone());
                continue;
            }

            if self.dry_run {
                self.sink.emit(&format!(
                    "[DRY RUN] Would create channel: {} in {}",
                    channel.name, category_name
                ));
                let id = format!("dry_run_chan_{}", channel.id);
                self.mapping.channels.insert(channel.id.clone(), id.clone());
                ids.push(id);
                continue;
            }

            let payload = NewChannel {
                name: channel.name.clone(),
                channel_type: match channel.kind {
                    SourceChannelKind::Voice => "Voice",
                    _ => "Text",
                },
                description: channel.topic.clone(),
            };
            match self
                .api
                .create_channel(self.target_server_id, &payload)
                .await
            {
                Ok(created) => {
                    self.sink.emit(&format!(
                        "Created channel: {} in {}",
                        channel.name, category_name
                    ));
                    self.mapping
                        .channels
                        .insert(channel.id.clone(), created.id.clone());
                    ids.push(created.id);
                }
                Err(err) => {
                    warn!(channel = %channel.name, %err, "failed to create channel, skipping");
                }
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_table_translates_each_capability() {
        assert_eq!(map_permissions(1 << 10), 1 << 20); // view channel
        assert_eq!(map_permissions(1 << 11), 1 << 22); // send messages
        assert_eq!(map_permissions(1 << 13), 1 << 24); // manage messages
        assert_eq!(map_permissions(1 << 4), 1 << 2); // manage channels
        assert_eq!(map_permissions(1 << 28), 1 << 3); // manage roles
        assert_eq!(map_permissions(1 << 20), 1 << 30); // connect
        assert_eq!(map_permissions(1 << 21), 1 << 31); // speak
    }

    #[test]
    fn unmapped_capabilities_dropped_silently() {
        // Administrator (bit 3) has no destination equivalent.
        assert_eq!(map_permissions(1 << 3), 0);
        assert_eq!(map_permissions((1 << 3) | (1 << 10)), 1 << 20);
    }

    #[test]
    fn colour_formats_as_hex_or_none() {
        assert_eq!(colour_hex(0xff0000).as_deref(), Some("#ff0000"));
        assert_eq!(colour_hex(0x00_00ff).as_deref(), Some("#0000ff"));
        assert_eq!(colour_hex(0), None);
    }

    #[test]
    fn short_category_ids_are_short_and_unique() {
        let a = short_category_id();
        let b = short_category_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }
}
