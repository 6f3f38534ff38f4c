//! Chat client: join flow, message/presence handling and presentation.

pub mod credential;
pub mod render;
pub mod session;
pub mod view;

pub use credential::{CredentialSource, HttpCredentialSource};
pub use session::{ChatSession, SessionState};
pub use view::ChatView;
