//! Snapshot emission and restore replay.
//!
//! The snapshot is a list of command lines: `contact|<name>|<ip,...>|<port>`
//! for every routing peer, then per collection `collection|<name>` followed
//! by its `ownership|<location>` lines, each with its `delegation|<location>`
//! lines. The log carries one `collection|location|id` line per item.

use trellis_core::{ContactInfo, Item, Peer, StorageError};

use crate::error::{Error, Result};
use crate::node::Node;

impl Node {
    /// The command list describing this node's durable state.
    pub fn snapshot(&self) -> Vec<String> {
        let mut commands = Vec::new();

        self.routing.traverse(|_, _, peer| {
            if let Some(contact) = self.registered.get(&peer.id()) {
                let ips: Vec<String> = contact.ips().into_iter().collect();
                commands.push(format!(
                    "contact|{}|{}|{}",
                    contact.name(),
                    ips.join(","),
                    contact.port()
                ));
            }
        });

        for collection in self.collections.list() {
            commands.push(format!("collection|{}", collection.name()));
            let extra = std::cell::RefCell::new(Vec::new());
            collection.browse(
                |ownership| extra.borrow_mut().push(format!("ownership|{ownership}")),
                |_, delegation| extra.borrow_mut().push(format!("delegation|{delegation}")),
            );
            commands.extend(extra.into_inner());
        }
        commands
    }

    /// Replay the snapshot commands, then stream the log back through the
    /// regular insertion path. Items under delegated locations fall out of
    /// `allowing` and are dropped.
    pub(crate) fn restore(&self) -> Result<()> {
        if !self.storage.exist() {
            return Ok(());
        }
        let commands = self.storage.load()?;

        let mut collection: Option<String> = None;
        for command in &commands {
            let mut parts = command.split('|');
            match parts.next() {
                Some("contact") => {
                    let (Some(name), Some(ips), Some(port)) =
                        (parts.next(), parts.next(), parts.next())
                    else {
                        continue;
                    };
                    let Ok(port) = port.parse::<u16>() else {
                        continue;
                    };
                    let info = ContactInfo {
                        name: name.to_string(),
                        ips: ips.split(',').map(str::to_string).collect(),
                        ip: String::new(),
                        port,
                    };
                    self.acknowledge(self.make_contacts(std::slice::from_ref(&info)));
                }
                Some("collection") => {
                    collection = parts.next().map(str::to_string);
                }
                Some("ownership") => {
                    let (Some(name), Some(location)) = (collection.as_deref(), parts.next())
                    else {
                        return Err(corrupted("ownership command out of order"));
                    };
                    self.create(name, location);
                }
                Some("delegation") => {
                    let (Some(name), Some(location)) = (collection.as_deref(), parts.next())
                    else {
                        return Err(corrupted("delegation command out of order"));
                    };
                    if let Some(c) = self.collections.get(name) {
                        c.delegate(location);
                    }
                }
                _ => return Err(corrupted(command)),
            }
        }

        for line in self.storage.stream(0) {
            let Some(item) = Item::parse(&line) else {
                tracing::warn!(line = %line, "skipping malformed log line");
                continue;
            };
            if self.collections.get(&item.collection).is_some() {
                self.add(&item);
            }
        }
        Ok(())
    }
}

fn corrupted(reason: &str) -> Error {
    Error::Storage(StorageError::Corrupted {
        reason: reason.to_string(),
    })
}
