// Optional session services wired up when their config sections enable them.

pub mod input;
pub mod voice;

pub use input::{InputBroadcaster, InputEvent};
pub use voice::{VoiceEvent, VoiceSignaling};
