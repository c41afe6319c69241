pub mod attachment;
pub mod backend;
pub mod conversation;
pub mod error;
pub mod event;
pub mod message;
pub mod notice;
pub mod persona;

pub use attachment::*;
pub use backend::*;
pub use conversation::{ConversationMeta, new_conversation_id, new_id, title_of};
pub use error::{TransportError, ValidationError};
pub use event::{ArcEventTx, Event, EventTx, publish};
pub use message::{DisplayMessage, Part, Role, ToolState};
pub use notice::*;
pub use persona::{Persona, PersonaParams};
