//! Shared campaign model carried by commands.
//!
//! Only the fields the synchronization layer needs to route and apply
//! mutations are modelled; rendering and rule semantics live elsewhere.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{AssetId, Guid};

/// The full shared session state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    /// Campaign identifier.
    pub id: Guid,
    /// Zones (maps) keyed by id.
    pub zones: BTreeMap<Guid, Zone>,
    /// Metadata for every asset referenced by the campaign.
    pub assets: BTreeMap<AssetId, AssetInfo>,
}

impl Campaign {
    /// Create an empty campaign.
    pub fn new() -> Self {
        Self::default()
    }
}

/// A single map in the campaign.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Zone identifier.
    pub id: Guid,
    /// Display name.
    pub name: String,
    /// Background image, if any.
    pub background: Option<AssetId>,
    /// Whether players can see this zone.
    pub visible: bool,
    /// Grid geometry.
    pub grid: GridConfig,
    /// Whether fog of war is enabled.
    pub has_fog: bool,
    /// Areas currently exposed through the fog.
    pub exposed: Area,
    /// Tokens in z-order (index 0 is drawn first, i.e. at the back).
    pub tokens: Vec<Token>,
    /// Labels keyed by id.
    pub labels: BTreeMap<Guid, Label>,
    /// Drawings in the order they were made.
    pub drawables: Vec<DrawnElement>,
}

impl Zone {
    /// Create an empty, visible zone with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Guid::new(),
            name: name.into(),
            visible: true,
            ..Self::default()
        }
    }

    /// Look up a token by id.
    pub fn token(&self, id: &Guid) -> Option<&Token> {
        self.tokens.iter().find(|t| t.id == *id)
    }

    /// Insert a token, or replace it in place (keeping its z-order) if a
    /// token with the same id already exists.
    pub fn put_token(&mut self, token: Token) {
        match self.tokens.iter_mut().find(|t| t.id == token.id) {
            Some(existing) => *existing = token,
            None => self.tokens.push(token),
        }
    }

    /// Remove a token by id.
    pub fn remove_token(&mut self, id: &Guid) -> Option<Token> {
        let pos = self.tokens.iter().position(|t| t.id == *id)?;
        Some(self.tokens.remove(pos))
    }

    /// Move the given tokens behind all others, preserving their relative order.
    pub fn send_tokens_to_back(&mut self, ids: &[Guid]) {
        let (mut moved, rest): (Vec<Token>, Vec<Token>) =
            self.tokens.drain(..).partition(|t| ids.contains(&t.id));
        moved.extend(rest);
        self.tokens = moved;
    }

    /// Move the given tokens in front of all others, preserving their relative order.
    pub fn bring_tokens_to_front(&mut self, ids: &[Guid]) {
        let (moved, mut rest): (Vec<Token>, Vec<Token>) =
            self.tokens.drain(..).partition(|t| ids.contains(&t.id));
        rest.extend(moved);
        self.tokens = rest;
    }

    /// Remove a drawing by id.
    pub fn remove_drawable(&mut self, id: &Guid) -> Option<DrawnElement> {
        let pos = self.drawables.iter().position(|d| d.drawable.id == *id)?;
        Some(self.drawables.remove(pos))
    }

    /// Reveal an area through the fog.
    pub fn expose_area(&mut self, area: &Area) {
        for rect in &area.rects {
            if !self.exposed.rects.contains(rect) {
                self.exposed.rects.push(*rect);
            }
        }
    }

    /// Cover an area with fog again. Exposed rectangles that lie entirely
    /// inside the hidden area are dropped.
    pub fn hide_area(&mut self, area: &Area) {
        self.exposed
            .rects
            .retain(|exposed| !area.rects.iter().any(|hidden| hidden.contains(exposed)));
    }
}

/// Grid geometry for a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Cell size in pixels.
    pub size: i32,
    /// Horizontal offset in pixels.
    pub offset_x: i32,
    /// Vertical offset in pixels.
    pub offset_y: i32,
    /// Grid line color (ARGB).
    pub color: i32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            size: 50,
            offset_x: 0,
            offset_y: 0,
            color: 0xFF00_0000_u32 as i32,
        }
    }
}

/// A token placed on a zone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Token identifier.
    pub id: Guid,
    /// Display name.
    pub name: String,
    /// Image shown for this token. Clients treat a missing asset as "not yet
    /// available" rather than an error.
    pub image: Option<AssetId>,
    /// Position on the zone.
    pub x: i32,
    /// Position on the zone.
    pub y: i32,
    /// Owning players; empty means owned by everyone.
    pub owners: Vec<String>,
}

/// A text label placed on a zone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Label {
    /// Label identifier.
    pub id: Guid,
    /// Label text.
    pub text: String,
    /// Position on the zone.
    pub x: i32,
    /// Position on the zone.
    pub y: i32,
}

/// Pen used for a drawing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pen {
    /// Stroke color (ARGB).
    pub color: i32,
    /// Stroke width.
    pub thickness: f32,
    /// Whether the pen erases instead of painting.
    pub eraser: bool,
}

/// Shape of a drawing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    /// Free-hand or poly line.
    Line(Vec<ZonePoint>),
    /// Axis-aligned rectangle.
    Rectangle(Rect),
    /// Ellipse inscribed in the rectangle.
    Oval(Rect),
}

/// A drawing without its pen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawable {
    /// Drawing identifier (used by `undoDraw`).
    pub id: Guid,
    /// The drawn shape.
    pub shape: Shape,
}

/// A drawing together with the pen it was made with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawnElement {
    /// The drawing.
    pub drawable: Drawable,
    /// The pen.
    pub pen: Pen,
}

/// A point in zone coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZonePoint {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate.
    pub y: i32,
}

/// Axis-aligned rectangle in zone coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: i32,
    /// Height.
    pub height: i32,
}

impl Rect {
    /// Whether `other` lies entirely inside this rectangle.
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.width <= self.x + self.width
            && other.y + other.height <= self.y + self.height
    }
}

/// A region made of rectangles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    /// Rectangles making up the region.
    pub rects: Vec<Rect>,
}

impl Area {
    /// Region consisting of a single rectangle.
    pub fn rect(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            rects: vec![Rect {
                x,
                y,
                width,
                height,
            }],
        }
    }
}

/// Kind of pointer a player shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerKind {
    /// Arrow pointer.
    Arrow,
    /// Speech bubble.
    SpeechBubble,
    /// Thought bubble.
    ThoughtBubble,
}

/// A pointer shown on a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pointer {
    /// Zone the pointer is on.
    pub zone: Guid,
    /// Position.
    pub x: i32,
    /// Position.
    pub y: i32,
    /// Pointer style.
    pub kind: PointerKind,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    /// Sending player.
    pub source: String,
    /// Recipient player, or `None` for everyone.
    pub target: Option<String>,
    /// Message body.
    pub text: String,
}

/// Metadata describing an asset; the bytes travel separately as chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    /// Content id.
    pub id: AssetId,
    /// Display name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(name: &str) -> Token {
        Token {
            id: Guid::new(),
            name: name.into(),
            ..Token::default()
        }
    }

    #[test]
    fn put_token_upserts_in_place() {
        let mut zone = Zone::new("Cave");
        let a = token("a");
        let b = token("b");
        zone.put_token(a.clone());
        zone.put_token(b.clone());

        let mut moved = a.clone();
        moved.x = 10;
        zone.put_token(moved);

        assert_eq!(zone.tokens.len(), 2);
        assert_eq!(zone.tokens[0].id, a.id);
        assert_eq!(zone.tokens[0].x, 10);
    }

    #[test]
    fn z_order_reordering() {
        let mut zone = Zone::new("Cave");
        let (a, b, c) = (token("a"), token("b"), token("c"));
        for t in [&a, &b, &c] {
            zone.put_token(t.clone());
        }

        zone.send_tokens_to_back(&[c.id]);
        let order: Vec<_> = zone.tokens.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(order, ["c", "a", "b"]);

        zone.bring_tokens_to_front(&[c.id, a.id]);
        let order: Vec<_> = zone.tokens.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(order, ["b", "c", "a"]);
    }

    #[test]
    fn fog_expose_and_hide() {
        let mut zone = Zone::new("Cave");
        zone.expose_area(&Area::rect(0, 0, 10, 10));
        zone.expose_area(&Area::rect(50, 50, 10, 10));
        zone.expose_area(&Area::rect(0, 0, 10, 10));
        assert_eq!(zone.exposed.rects.len(), 2);

        zone.hide_area(&Area::rect(-5, -5, 20, 20));
        assert_eq!(zone.exposed.rects, vec![Rect { x: 50, y: 50, width: 10, height: 10 }]);
    }

    #[test]
    fn remove_missing_token_is_none() {
        let mut zone = Zone::new("Cave");
        assert!(zone.remove_token(&Guid::new()).is_none());
    }
}
