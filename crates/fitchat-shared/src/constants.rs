/// Application name
pub const APP_NAME: &str = "FitChat";

/// Store root under which every conversation lives
pub const DEFAULT_CONVERSATIONS_ROOT: &str = "conversations";

/// Child collection holding a conversation's messages
pub const MESSAGES_SEGMENT: &str = "messages";

/// Key used when a navigation parameter normalises to nothing
pub const DEFAULT_CHAT_KEY: &str = "default";

/// Display-name prefix for counterparts missing from the roster
pub const SYNTHETIC_NAME_PREFIX: &str = "Cliente";

/// Avatar generator used for synthetic identities
pub const DEFAULT_AVATAR_SERVICE: &str = "https://ui-avatars.com/api/";

/// Generic message shown when a live subscription fails
pub const CONNECTION_ERROR_MESSAGE: &str = "Error de conexión. Intenta de nuevo más tarde.";

/// Record field names written back by the read-receipt batch
pub const FIELD_READ_BY_RECIPIENT: &str = "readByRecipient";
pub const FIELD_READ_AT: &str = "readAt";
