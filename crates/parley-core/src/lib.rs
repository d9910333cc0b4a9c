pub mod events;
pub mod ids;
pub mod messages;
pub mod users;

pub use events::{ClientEvent, ServerEvent};
pub use ids::{ConnectionId, CorrelationId, MessageId, UserId};
pub use messages::{Message, MessageDraft, MessagePage, Pagination};
pub use users::UserProfile;
