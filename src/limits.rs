/// Hard upper bound on the configurable hold TTL.
pub const MAX_HOLD_TTL_SECS: u64 = 3_600;

/// Lifetime of the store-side booking marker a commit leaves behind. It has to
/// outlast any acquire that read the slot as unbooked before the commit.
pub const BOOKING_FENCE_TTL_SECS: u64 = 86_400;

/// Optimistic transaction attempts before `acquire`/`release` give up.
pub const MAX_TXN_ATTEMPTS: usize = 64;

/// Keys fetched per `scan` round-trip when listing holds.
pub const SCAN_BATCH: usize = 100;

pub const MAX_HOLDER_ID_LEN: usize = 256;
pub const MAX_TENANT_NAME_LEN: usize = 128;
pub const MAX_TENANTS: usize = 1_000;

/// Distinct day rooms a single WebSocket connection may join.
pub const MAX_ROOMS_PER_CONNECTION: usize = 31;

/// Per-room broadcast buffer. Slow spectators past this lag and resync via snapshot.
pub const ROOM_CHANNEL_CAPACITY: usize = 256;

/// Outbound frames buffered per WebSocket connection.
pub const SESSION_OUTBOX_CAPACITY: usize = 512;
