//! Application-wide constants for portal-notify.
//!
//! Centralizes the magic numbers of the sync engine. Constants are grouped
//! by the component that consumes them.

// Rust guideline compliant 2026-02

use std::time::Duration;

// ============================================================================
// Store
// ============================================================================

/// Maximum number of notifications held by the store.
///
/// Applied by truncating the tail after every insertion at the head.
pub const NOTIFICATION_CAPACITY: usize = 50;

// ============================================================================
// Connection manager
// ============================================================================

/// Delay before the single retry that follows an authentication close.
pub const AUTH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default reconnect schedule in milliseconds, used when the config does not
/// override it. The last entry repeats once the schedule is exhausted.
pub const DEFAULT_RECONNECT_DELAYS_MS: [u64; 4] = [0, 2_000, 10_000, 30_000];

// ============================================================================
// Hub transport
// ============================================================================

/// Upper bound on one connect attempt: WebSocket upgrade plus hub handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Interval between client keep-alive pings.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// A connection with no inbound traffic for this long is considered lost.
///
/// Twice the server's default keep-alive interval.
pub const SERVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on waiting for the transport task to wind down in `close()`.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// HTTP
// ============================================================================

/// HTTP client request timeout for the notification API.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Events
// ============================================================================

/// Hub event carrying student notifications.
pub const STUDENT_EVENT: &str = "ReceiveMessage";

/// Hub event carrying admin notifications.
pub const ADMIN_EVENT: &str = "ReceiveAdminMessage";

/// JWT claim holding the user's roles.
pub const ROLE_CLAIM: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role";
