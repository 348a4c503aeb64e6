//! Authoritative campaign state.
//!
//! The router is the only writer. Storage is behind a trait so hosts can
//! persist the campaign however they like; [`CampaignStore`] keeps it in
//! memory.

use sync_types::model::{AssetInfo, Campaign, Label, Token, Zone};
use sync_types::{AssetId, Guid};

use crate::error::{StateError, StateResult};

/// Address of one stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKey {
    /// A zone.
    Zone(Guid),
    /// A token on a zone.
    Token {
        /// Owning zone.
        zone: Guid,
        /// Token id.
        token: Guid,
    },
    /// A label on a zone.
    Label {
        /// Owning zone.
        zone: Guid,
        /// Label id.
        label: Guid,
    },
    /// Asset metadata.
    Asset(AssetId),
}

/// One stored object.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEntry {
    /// A zone.
    Zone(Zone),
    /// A token and its zone.
    Token {
        /// Owning zone.
        zone: Guid,
        /// The token.
        token: Token,
    },
    /// A label and its zone.
    Label {
        /// Owning zone.
        zone: Guid,
        /// The label.
        label: Label,
    },
    /// Asset metadata.
    Asset(AssetInfo),
}

/// Key-value view of the campaign.
pub trait AuthoritativeState: Send {
    /// Fetch one object.
    fn get(&self, key: &StateKey) -> Option<StateEntry>;

    /// Insert or replace one object. Tokens and labels need their zone to exist.
    fn put(&mut self, entry: StateEntry) -> StateResult<()>;

    /// Delete one object, returning it.
    fn remove(&mut self, key: &StateKey) -> StateResult<StateEntry>;

    /// Mutable access to a zone for in-place edits.
    fn zone_mut(&mut self, zone: &Guid) -> StateResult<&mut Zone>;

    /// Copy of the whole campaign.
    fn snapshot(&self) -> Campaign;

    /// Replace the whole campaign.
    fn replace(&mut self, campaign: Campaign);
}

/// In-memory campaign.
#[derive(Debug, Default)]
pub struct CampaignStore {
    campaign: Campaign,
}

impl CampaignStore {
    /// Start from an existing campaign.
    pub fn new(campaign: Campaign) -> Self {
        Self { campaign }
    }
}

impl AuthoritativeState for CampaignStore {
    fn get(&self, key: &StateKey) -> Option<StateEntry> {
        match key {
            StateKey::Zone(id) => self.campaign.zones.get(id).cloned().map(StateEntry::Zone),
            StateKey::Token { zone, token } => {
                let z = self.campaign.zones.get(zone)?;
                z.token(token).cloned().map(|token| StateEntry::Token {
                    zone: *zone,
                    token,
                })
            }
            StateKey::Label { zone, label } => {
                let z = self.campaign.zones.get(zone)?;
                z.labels.get(label).cloned().map(|label| StateEntry::Label {
                    zone: *zone,
                    label,
                })
            }
            StateKey::Asset(id) => self.campaign.assets.get(id).cloned().map(StateEntry::Asset),
        }
    }

    fn put(&mut self, entry: StateEntry) -> StateResult<()> {
        match entry {
            StateEntry::Zone(zone) => {
                self.campaign.zones.insert(zone.id, zone);
            }
            StateEntry::Token { zone, token } => self.zone_mut(&zone)?.put_token(token),
            StateEntry::Label { zone, label } => {
                self.zone_mut(&zone)?.labels.insert(label.id, label);
            }
            StateEntry::Asset(info) => {
                self.campaign.assets.insert(info.id, info);
            }
        }
        Ok(())
    }

    fn remove(&mut self, key: &StateKey) -> StateResult<StateEntry> {
        match *key {
            StateKey::Zone(id) => self
                .campaign
                .zones
                .remove(&id)
                .map(StateEntry::Zone)
                .ok_or(StateError::UnknownZone(id)),
            StateKey::Token { zone, token } => self
                .zone_mut(&zone)?
                .remove_token(&token)
                .map(|t| StateEntry::Token { zone, token: t })
                .ok_or(StateError::UnknownToken { zone, token }),
            StateKey::Label { zone, label } => self
                .zone_mut(&zone)?
                .labels
                .remove(&label)
                .map(|l| StateEntry::Label { zone, label: l })
                .ok_or(StateError::UnknownLabel { zone, label }),
            StateKey::Asset(id) => self
                .campaign
                .assets
                .remove(&id)
                .map(StateEntry::Asset)
                .ok_or(StateError::UnknownAsset(id)),
        }
    }

    fn zone_mut(&mut self, zone: &Guid) -> StateResult<&mut Zone> {
        self.campaign
            .zones
            .get_mut(zone)
            .ok_or(StateError::UnknownZone(*zone))
    }

    fn snapshot(&self) -> Campaign {
        self.campaign.clone()
    }

    fn replace(&mut self, campaign: Campaign) {
        self.campaign = campaign;
    }
}
