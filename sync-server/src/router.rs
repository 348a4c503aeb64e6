//! Command dispatch.
//!
//! Every command from an admitted connection goes through
//! [`CommandRouter::dispatch`]: it is applied to the authoritative state and
//! then forwarded verbatim to every other connection. Mutation and
//! broadcast happen under the same state lock, so all clients observe one
//! global order.

use crate::error::{StateError, StateResult};
use crate::server::{ServerContext, ServerMetrics};
use crate::state::{AuthoritativeState, StateEntry, StateKey};
use std::sync::Arc;
use sync_types::model::{DrawnElement, GridConfig};
use sync_types::{Command, ConnectionId, Message};

/// Applies and forwards commands.
#[derive(Debug, Clone)]
pub struct CommandRouter {
    ctx: Arc<ServerContext>,
}

impl CommandRouter {
    /// Create a router over a server context.
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    /// Apply `command` from `sender` and forward it.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] when the command cannot be applied. Nothing
    /// is changed or forwarded in that case.
    pub async fn dispatch(&self, sender: ConnectionId, command: Command) -> StateResult<()> {
        let Some(identity) = self.ctx.registry().identity_of(sender) else {
            tracing::debug!("Dropping {} from unregistered {}", command.kind(), sender);
            return Ok(());
        };
        if command.requires_gm() && !identity.is_gm() {
            return Err(StateError::NotPermitted {
                command: command.kind(),
            });
        }

        match &command {
            Command::Heartbeat { .. } => {
                tracing::debug!("Heartbeat from {}", identity.name);
                return Ok(());
            }
            Command::GetAsset { id } => {
                self.send_asset(sender, *id).await;
                return Ok(());
            }
            _ => {}
        }

        let mut state = self.ctx.state().await;
        match &command {
            Command::GetZone { zone } => {
                let Some(StateEntry::Zone(found)) = state.get(&StateKey::Zone(*zone)) else {
                    return Err(StateError::UnknownZone(*zone));
                };
                self.ctx
                    .registry()
                    .send_to(sender, Message::Command(Command::PutZone(found)));
                return Ok(());
            }
            Command::BootPlayer { player } => {
                let target = self
                    .ctx
                    .registry()
                    .lookup_connection_id(player)
                    .ok_or_else(|| StateError::UnknownPlayer(player.clone()))?;
                let registry = self.ctx.registry();
                registry.kick(target, format!("Booted by {}", identity.name));
                // Forget the target first so neither the departure nor the
                // boot itself is echoed to it. Its session's own disconnect
                // then finds nothing left to announce.
                if let Some(booted) = registry.unregister(target) {
                    tracing::info!("{} booted {} ({})", identity.name, booted.name, target);
                    registry.broadcast_except(target, &Message::PlayerDisconnected(booted));
                }
            }
            Command::SetServerPolicy(policy) => self.ctx.set_policy(policy.clone()),
            _ => apply(&mut **state, &command)?,
        }

        let delivered = self
            .ctx
            .registry()
            .broadcast_except(sender, &Message::Command(command.clone()));
        drop(state);

        ServerMetrics::add(&self.ctx.metrics().commands_applied, 1);
        tracing::debug!(
            "{} from {} forwarded to {} connections",
            command.kind(),
            identity.name,
            delivered
        );
        Ok(())
    }

    async fn send_asset(&self, sender: ConnectionId, id: sync_types::AssetId) {
        let Some(outbound) = self.ctx.registry().outbound(sender) else {
            return;
        };
        let result = self
            .ctx
            .transfers()
            .start_download(sender, id, Arc::clone(self.ctx.store()), &outbound)
            .await;
        if let Err(e) = result {
            tracing::warn!("Cannot send asset {} to {}: {}", id, sender, e);
            ServerMetrics::add(&self.ctx.metrics().transfers_failed, 1);
            self.ctx.registry().send_to(
                sender,
                Message::AssetFailed {
                    id,
                    reason: e.to_string(),
                },
            );
        }
    }
}

/// Apply one mutating command to the campaign.
///
/// Queries, role-gated commands and keep-alives are handled by the router
/// and are no-ops here.
pub fn apply(state: &mut dyn AuthoritativeState, command: &Command) -> StateResult<()> {
    match command {
        Command::SetCampaign(campaign) => state.replace(campaign.clone()),
        Command::PutZone(zone) => state.put(StateEntry::Zone(zone.clone()))?,
        Command::RemoveZone { zone } => {
            state.remove(&StateKey::Zone(*zone))?;
        }
        Command::PutAsset(info) => state.put(StateEntry::Asset(info.clone()))?,
        Command::RemoveAsset { id } => {
            state.remove(&StateKey::Asset(*id))?;
        }
        Command::PutToken { zone, token } => state.put(StateEntry::Token {
            zone: *zone,
            token: token.clone(),
        })?,
        Command::RemoveToken { zone, token } => {
            state.remove(&StateKey::Token {
                zone: *zone,
                token: *token,
            })?;
        }
        Command::PutLabel { zone, label } => state.put(StateEntry::Label {
            zone: *zone,
            label: label.clone(),
        })?,
        Command::RemoveLabel { zone, label } => {
            state.remove(&StateKey::Label {
                zone: *zone,
                label: *label,
            })?;
        }
        Command::Draw {
            zone,
            pen,
            drawable,
        } => state.zone_mut(zone)?.drawables.push(DrawnElement {
            drawable: drawable.clone(),
            pen: *pen,
        }),
        Command::UndoDraw { zone, drawable } => {
            state
                .zone_mut(zone)?
                .remove_drawable(drawable)
                .ok_or(StateError::UnknownDrawable {
                    zone: *zone,
                    drawable: *drawable,
                })?;
        }
        Command::ClearAllDrawings { zone } => state.zone_mut(zone)?.drawables.clear(),
        Command::SetZoneGridSize {
            zone,
            offset_x,
            offset_y,
            size,
            color,
        } => {
            state.zone_mut(zone)?.grid = GridConfig {
                size: *size,
                offset_x: *offset_x,
                offset_y: *offset_y,
                color: *color,
            }
        }
        Command::SetZoneVisibility { zone, visible } => state.zone_mut(zone)?.visible = *visible,
        Command::RenameZone { zone, name } => state.zone_mut(zone)?.name = name.clone(),
        Command::SetZoneHasFoW { zone, has_fog } => state.zone_mut(zone)?.has_fog = *has_fog,
        Command::ExposeFoW { zone, area } => state.zone_mut(zone)?.expose_area(area),
        Command::HideFoW { zone, area } => state.zone_mut(zone)?.hide_area(area),
        Command::SetFoW { zone, area } => state.zone_mut(zone)?.exposed = area.clone(),
        Command::SendTokensToBack { zone, tokens } => {
            state.zone_mut(zone)?.send_tokens_to_back(tokens)
        }
        Command::BringTokensToFront { zone, tokens } => {
            state.zone_mut(zone)?.bring_tokens_to_front(tokens)
        }
        // Transient: the zone must exist, nothing is stored.
        Command::EnforceZoneView { zone, .. }
        | Command::StartTokenMove { zone, .. }
        | Command::UpdateTokenMove { zone, .. }
        | Command::StopTokenMove { zone, .. }
        | Command::ToggleTokenMoveWaypoint { zone, .. } => {
            state.zone_mut(zone)?;
        }
        Command::ShowPointer { pointer, .. } => {
            state.zone_mut(&pointer.zone)?;
        }
        Command::Message(_)
        | Command::MovePointer { .. }
        | Command::HidePointer { .. }
        | Command::GetZone { .. }
        | Command::GetAsset { .. }
        | Command::BootPlayer { .. }
        | Command::SetServerPolicy(_)
        | Command::Heartbeat { .. } => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::{outbound_queue, Outbound, OutboundReceiver};
    use crate::state::CampaignStore;
    use sync_transfer::{AssetStore, MemoryAssetStore};
    use sync_types::model::{Area, Drawable, Pen, Shape, TextMessage, Token, Zone};
    use sync_types::{Guid, HandshakeRequest, Role, ServerPolicy};
    use tokio::sync::mpsc;

    struct Harness {
        ctx: Arc<ServerContext>,
        router: CommandRouter,
        store: Arc<MemoryAssetStore>,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryAssetStore::new());
            let mut config = Config::default();
            config.assets.staging = std::env::temp_dir().join("tabletop-sync-router-tests");
            let ctx = Arc::new(ServerContext::new(
                config,
                Box::new(CampaignStore::default()),
                Arc::clone(&store) as Arc<dyn AssetStore>,
            ));
            Self {
                router: CommandRouter::new(Arc::clone(&ctx)),
                ctx,
                store,
            }
        }

        async fn join(&self, conn: u64, name: &str, role: Role) -> OutboundReceiver {
            let (tx, mut rx) = outbound_queue(64);
            let (chunk_tx, _chunk_rx) = mpsc::channel(4);
            let conn = ConnectionId::new(conn);
            self.ctx.transfers().open(
                conn,
                chunk_tx,
                Arc::clone(self.ctx.store()),
                tx.clone(),
                Arc::clone(self.ctx.metrics()),
            );
            let admission = self
                .ctx
                .admit(conn, &HandshakeRequest::new(name, None, role), tx)
                .await;
            assert!(admission.response.is_ok());
            while rx.try_recv().is_ok() {}
            rx
        }

        async fn zone(&self) -> Guid {
            let zone = Zone::new("Cellar");
            let id = zone.id;
            apply(&mut **self.ctx.state().await, &Command::PutZone(zone)).unwrap();
            id
        }
    }

    fn commands(rx: &mut OutboundReceiver) -> Vec<Command> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Message(Message::Command(c)) = item {
                out.push(c);
            }
        }
        out
    }

    #[tokio::test]
    async fn mutation_is_applied_and_forwarded_to_others_only() {
        let h = Harness::new();
        let mut a = h.join(1, "A", Role::Gm).await;
        let mut b = h.join(2, "B", Role::Player).await;
        let mut c = h.join(3, "C", Role::Player).await;
        let zone = h.zone().await;
        while a.try_recv().is_ok() {}

        let cmd = Command::PutToken {
            zone,
            token: Token {
                name: "Orc".into(),
                ..Token::default()
            },
        };
        h.router
            .dispatch(ConnectionId::new(1), cmd.clone())
            .await
            .unwrap();

        assert!(commands(&mut a).is_empty());
        assert_eq!(commands(&mut b), vec![cmd.clone()]);
        assert_eq!(commands(&mut c), vec![cmd]);
        let snapshot = h.ctx.state().await.snapshot();
        assert_eq!(snapshot.zones[&zone].tokens.len(), 1);
    }

    #[tokio::test]
    async fn unknown_zone_is_rejected_and_not_forwarded() {
        let h = Harness::new();
        let _a = h.join(1, "A", Role::Player).await;
        let mut b = h.join(2, "B", Role::Player).await;

        let missing = Guid::new();
        let err = h
            .router
            .dispatch(
                ConnectionId::new(1),
                Command::RemoveZone { zone: missing },
            )
            .await
            .unwrap_err();
        assert_eq!(err, StateError::UnknownZone(missing));
        assert!(commands(&mut b).is_empty());
    }

    #[tokio::test]
    async fn get_zone_answers_requester_only() {
        let h = Harness::new();
        let mut a = h.join(1, "A", Role::Player).await;
        let mut b = h.join(2, "B", Role::Player).await;
        let zone = h.zone().await;

        h.router
            .dispatch(ConnectionId::new(1), Command::GetZone { zone })
            .await
            .unwrap();
        assert!(matches!(
            commands(&mut a).as_slice(),
            [Command::PutZone(z)] if z.id == zone
        ));
        assert!(commands(&mut b).is_empty());
    }

    #[tokio::test]
    async fn gm_only_commands_are_gated() {
        let h = Harness::new();
        let _gm = h.join(1, "Dm", Role::Gm).await;
        let mut player = h.join(2, "P", Role::Player).await;

        let policy = ServerPolicy {
            movement_locked: true,
            ..ServerPolicy::default()
        };
        let err = h
            .router
            .dispatch(ConnectionId::new(2), Command::SetServerPolicy(policy.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::NotPermitted { .. }));
        assert!(!h.ctx.policy().movement_locked);

        h.router
            .dispatch(ConnectionId::new(1), Command::SetServerPolicy(policy.clone()))
            .await
            .unwrap();
        assert_eq!(h.ctx.policy(), policy);
        assert_eq!(commands(&mut player), vec![Command::SetServerPolicy(policy)]);
    }

    #[tokio::test]
    async fn boot_player_closes_target() {
        let h = Harness::new();
        let mut gm = h.join(1, "Dm", Role::Gm).await;
        let mut victim = h.join(2, "Loud", Role::Player).await;
        let mut bystander = h.join(3, "Quiet", Role::Player).await;
        while gm.try_recv().is_ok() {}
        while victim.try_recv().is_ok() {}

        h.router
            .dispatch(
                ConnectionId::new(1),
                Command::BootPlayer {
                    player: "loud".into(),
                },
            )
            .await
            .unwrap();
        // The target hears nothing but its own close.
        assert!(matches!(
            victim.try_recv(),
            Ok(Outbound::Close { ref reason }) if reason == "Booted by Dm"
        ));
        assert!(victim.try_recv().is_err());

        let left = sync_types::Identity::new("Loud", Role::Player);
        assert!(matches!(
            gm.try_recv(),
            Ok(Outbound::Message(Message::PlayerDisconnected(ref who))) if *who == left
        ));
        assert!(gm.try_recv().is_err());
        assert!(matches!(
            bystander.try_recv(),
            Ok(Outbound::Message(Message::PlayerDisconnected(ref who))) if *who == left
        ));
        assert_eq!(
            commands(&mut bystander),
            vec![Command::BootPlayer {
                player: "loud".into()
            }]
        );
        assert_eq!(h.ctx.registry().len(), 2);

        // The session teardown that follows announces nothing twice.
        assert!(h.ctx.disconnect(ConnectionId::new(2)).await.is_none());
        assert!(gm.try_recv().is_err());

        let err = h
            .router
            .dispatch(
                ConnectionId::new(1),
                Command::BootPlayer {
                    player: "nobody".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, StateError::UnknownPlayer("nobody".into()));
    }

    #[tokio::test]
    async fn heartbeat_is_neither_applied_nor_forwarded() {
        let h = Harness::new();
        let _a = h.join(1, "A", Role::Player).await;
        let mut b = h.join(2, "B", Role::Player).await;
        h.router
            .dispatch(
                ConnectionId::new(1),
                Command::Heartbeat {
                    data: "ping".into(),
                },
            )
            .await
            .unwrap();
        assert!(commands(&mut b).is_empty());
        assert_eq!(ServerMetrics::get(&h.ctx.metrics().commands_applied), 0);
    }

    #[tokio::test]
    async fn message_is_forwarded_verbatim() {
        let h = Harness::new();
        let _a = h.join(1, "A", Role::Player).await;
        let mut b = h.join(2, "B", Role::Player).await;
        let cmd = Command::Message(TextMessage {
            source: "A".into(),
            target: None,
            text: "hello".into(),
        });
        h.router
            .dispatch(ConnectionId::new(1), cmd.clone())
            .await
            .unwrap();
        assert_eq!(commands(&mut b), vec![cmd]);
    }

    #[tokio::test]
    async fn get_asset_sends_header_or_failure() {
        let h = Harness::new();
        let mut a = h.join(1, "A", Role::Player).await;
        let info = h.store.put("map.png", b"map bytes").unwrap();

        h.router
            .dispatch(ConnectionId::new(1), Command::GetAsset { id: info.id })
            .await
            .unwrap();
        assert!(matches!(
            a.try_recv(),
            Ok(Outbound::Message(Message::AssetHeader(header))) if header.id == info.id
        ));

        let missing = sync_types::AssetId::of(b"missing");
        h.router
            .dispatch(ConnectionId::new(1), Command::GetAsset { id: missing })
            .await
            .unwrap();
        assert!(matches!(
            a.try_recv(),
            Ok(Outbound::Message(Message::AssetFailed { id, .. })) if id == missing
        ));
    }

    #[test]
    fn drawing_lifecycle() {
        let mut state = CampaignStore::default();
        let zone = Zone::new("Map");
        let id = zone.id;
        apply(&mut state, &Command::PutZone(zone)).unwrap();

        let drawable = Drawable {
            id: Guid::new(),
            shape: Shape::Rectangle(sync_types::model::Rect {
                x: 0,
                y: 0,
                width: 10,
                height: 10,
            }),
        };
        let pen = Pen {
            color: 0,
            thickness: 2.0,
            eraser: false,
        };
        apply(
            &mut state,
            &Command::Draw {
                zone: id,
                pen,
                drawable: drawable.clone(),
            },
        )
        .unwrap();
        apply(
            &mut state,
            &Command::UndoDraw {
                zone: id,
                drawable: drawable.id,
            },
        )
        .unwrap();
        assert!(matches!(
            apply(
                &mut state,
                &Command::UndoDraw {
                    zone: id,
                    drawable: drawable.id,
                },
            ),
            Err(StateError::UnknownDrawable { .. })
        ));
    }

    #[test]
    fn fog_commands_edit_exposed_area() {
        let mut state = CampaignStore::default();
        let zone = Zone::new("Dungeon");
        let id = zone.id;
        apply(&mut state, &Command::PutZone(zone)).unwrap();

        let area = Area::rect(0, 0, 5, 5);
        apply(
            &mut state,
            &Command::SetFoW {
                zone: id,
                area: area.clone(),
            },
        )
        .unwrap();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.zones[&id].exposed, area);

        apply(&mut state, &Command::HideFoW { zone: id, area }).unwrap();
        assert!(state.snapshot().zones[&id].exposed.rects.is_empty());
    }
}
