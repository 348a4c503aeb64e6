//! Campaign command vocabulary.
//!
//! Every mutation of shared state travels as one [`Command`]. Each variant
//! carries its own typed parameters, so a handler matches on the variant
//! instead of reading a positional parameter list.

use serde::{Deserialize, Serialize};

use crate::model::{
    Area, AssetInfo, Campaign, Drawable, Label, Pen, Pointer, TextMessage, Token, Zone, ZonePoint,
};
use crate::{AssetId, Guid, ServerPolicy};

/// A single campaign command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Replace the whole campaign.
    SetCampaign(Campaign),
    /// Ask the server for a zone; answered with `PutZone` to the requester only.
    GetZone {
        /// Zone to fetch.
        zone: Guid,
    },
    /// Insert or replace a zone.
    PutZone(Zone),
    /// Delete a zone.
    RemoveZone {
        /// Zone to delete.
        zone: Guid,
    },
    /// Register asset metadata. The bytes are transferred separately.
    PutAsset(AssetInfo),
    /// Ask the server for an asset; answered with a chunked transfer to the requester only.
    GetAsset {
        /// Asset to fetch.
        id: AssetId,
    },
    /// Forget asset metadata.
    RemoveAsset {
        /// Asset to forget.
        id: AssetId,
    },
    /// Insert or replace a token on a zone.
    PutToken {
        /// Target zone.
        zone: Guid,
        /// The token.
        token: Token,
    },
    /// Delete a token.
    RemoveToken {
        /// Target zone.
        zone: Guid,
        /// Token to delete.
        token: Guid,
    },
    /// Insert or replace a label on a zone.
    PutLabel {
        /// Target zone.
        zone: Guid,
        /// The label.
        label: Label,
    },
    /// Delete a label.
    RemoveLabel {
        /// Target zone.
        zone: Guid,
        /// Label to delete.
        label: Guid,
    },
    /// Append a drawing made with the given pen.
    Draw {
        /// Target zone.
        zone: Guid,
        /// Pen used.
        pen: Pen,
        /// The drawing.
        drawable: Drawable,
    },
    /// Remove a drawing.
    UndoDraw {
        /// Target zone.
        zone: Guid,
        /// Drawing to remove.
        drawable: Guid,
    },
    /// Remove every drawing on a zone.
    ClearAllDrawings {
        /// Target zone.
        zone: Guid,
    },
    /// Change grid geometry.
    SetZoneGridSize {
        /// Target zone.
        zone: Guid,
        /// Horizontal offset.
        offset_x: i32,
        /// Vertical offset.
        offset_y: i32,
        /// Cell size.
        size: i32,
        /// Line color (ARGB).
        color: i32,
    },
    /// Show or hide a zone from players.
    SetZoneVisibility {
        /// Target zone.
        zone: Guid,
        /// New visibility.
        visible: bool,
    },
    /// Rename a zone.
    RenameZone {
        /// Target zone.
        zone: Guid,
        /// New name.
        name: String,
    },
    /// Enable or disable fog of war.
    SetZoneHasFoW {
        /// Target zone.
        zone: Guid,
        /// Whether fog is on.
        has_fog: bool,
    },
    /// Reveal an area.
    ExposeFoW {
        /// Target zone.
        zone: Guid,
        /// Area to reveal.
        area: Area,
    },
    /// Cover an area.
    HideFoW {
        /// Target zone.
        zone: Guid,
        /// Area to cover.
        area: Area,
    },
    /// Replace the exposed area entirely.
    SetFoW {
        /// Target zone.
        zone: Guid,
        /// New exposed area.
        area: Area,
    },
    /// Force every client to look at a zone position.
    EnforceZoneView {
        /// Target zone.
        zone: Guid,
        /// Center X.
        x: i32,
        /// Center Y.
        y: i32,
        /// Zoom factor.
        scale: f64,
    },
    /// Chat message.
    Message(TextMessage),
    /// Show a player's pointer.
    ShowPointer {
        /// Player showing the pointer.
        player: String,
        /// The pointer.
        pointer: Pointer,
    },
    /// Move a player's pointer.
    MovePointer {
        /// Player moving the pointer.
        player: String,
        /// New X.
        x: i32,
        /// New Y.
        y: i32,
    },
    /// Hide a player's pointer.
    HidePointer {
        /// Player hiding the pointer.
        player: String,
    },
    /// A player started dragging tokens.
    StartTokenMove {
        /// Player dragging.
        player: String,
        /// Zone the tokens are on.
        zone: Guid,
        /// Token under the cursor.
        token: Guid,
        /// All tokens being dragged.
        tokens: Vec<Guid>,
    },
    /// Drag position update.
    UpdateTokenMove {
        /// Zone the token is on.
        zone: Guid,
        /// Token being dragged.
        token: Guid,
        /// Current X.
        x: i32,
        /// Current Y.
        y: i32,
    },
    /// Drag finished.
    StopTokenMove {
        /// Zone the token is on.
        zone: Guid,
        /// Token that was dragged.
        token: Guid,
    },
    /// Add or remove a waypoint on the current drag path.
    ToggleTokenMoveWaypoint {
        /// Zone the token is on.
        zone: Guid,
        /// Token being dragged.
        token: Guid,
        /// Waypoint.
        point: ZonePoint,
    },
    /// Move tokens behind all others.
    SendTokensToBack {
        /// Target zone.
        zone: Guid,
        /// Tokens to move.
        tokens: Vec<Guid>,
    },
    /// Move tokens in front of all others.
    BringTokensToFront {
        /// Target zone.
        zone: Guid,
        /// Tokens to move.
        tokens: Vec<Guid>,
    },
    /// Disconnect a player by name. GM only.
    BootPlayer {
        /// Player to disconnect.
        player: String,
    },
    /// Replace the server policy. GM only.
    SetServerPolicy(ServerPolicy),
    /// Client keep-alive. Never applied or broadcast.
    Heartbeat {
        /// Opaque payload.
        data: String,
    },
}

impl Command {
    /// Wire name of the command kind, used in logs and NACKs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetCampaign(_) => "setCampaign",
            Self::GetZone { .. } => "getZone",
            Self::PutZone(_) => "putZone",
            Self::RemoveZone { .. } => "removeZone",
            Self::PutAsset(_) => "putAsset",
            Self::GetAsset { .. } => "getAsset",
            Self::RemoveAsset { .. } => "removeAsset",
            Self::PutToken { .. } => "putToken",
            Self::RemoveToken { .. } => "removeToken",
            Self::PutLabel { .. } => "putLabel",
            Self::RemoveLabel { .. } => "removeLabel",
            Self::Draw { .. } => "draw",
            Self::UndoDraw { .. } => "undoDraw",
            Self::ClearAllDrawings { .. } => "clearAllDrawings",
            Self::SetZoneGridSize { .. } => "setZoneGridSize",
            Self::SetZoneVisibility { .. } => "setZoneVisibility",
            Self::RenameZone { .. } => "renameZone",
            Self::SetZoneHasFoW { .. } => "setZoneHasFoW",
            Self::ExposeFoW { .. } => "exposeFoW",
            Self::HideFoW { .. } => "hideFoW",
            Self::SetFoW { .. } => "setFoW",
            Self::EnforceZoneView { .. } => "enforceZoneView",
            Self::Message(_) => "message",
            Self::ShowPointer { .. } => "showPointer",
            Self::MovePointer { .. } => "movePointer",
            Self::HidePointer { .. } => "hidePointer",
            Self::StartTokenMove { .. } => "startTokenMove",
            Self::UpdateTokenMove { .. } => "updateTokenMove",
            Self::StopTokenMove { .. } => "stopTokenMove",
            Self::ToggleTokenMoveWaypoint { .. } => "toggleTokenMoveWaypoint",
            Self::SendTokensToBack { .. } => "sendTokensToBack",
            Self::BringTokensToFront { .. } => "bringTokensToFront",
            Self::BootPlayer { .. } => "bootPlayer",
            Self::SetServerPolicy(_) => "setServerPolicy",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }

    /// Whether this command only reads state and is answered to the sender
    /// instead of being rebroadcast.
    pub fn is_query(&self) -> bool {
        matches!(self, Self::GetZone { .. } | Self::GetAsset { .. })
    }

    /// Whether only a GM may issue this command.
    pub fn requires_gm(&self) -> bool {
        matches!(self, Self::BootPlayer { .. } | Self::SetServerPolicy(_))
    }
}
