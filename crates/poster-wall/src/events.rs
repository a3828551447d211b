use crate::item::Item;

/// Exactly one of these holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WallMode {
    Idle,
    Streaming,
}

/// Emitted by the engine as the wall changes; consumers are informational only.
#[derive(Debug, Clone, PartialEq)]
pub enum WallEvent {
    /// An item became the committed display.
    Displayed { item: Item, mode: WallMode },
    /// Playback progress of the displayed stream changed in place.
    Progress(Item),
    ModeChanged {
        from: WallMode,
        to: WallMode,
        streams: usize,
    },
    BatchLoaded { items: usize },
}
