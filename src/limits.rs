/// Max rooms the registry will hold.
pub const MAX_ROOMS: usize = 10_000;

/// Max bytes for room name, building, department, kind and location.
pub const MAX_NAME_LEN: usize = 256;

/// Max bytes for a booking purpose.
pub const MAX_PURPOSE_LEN: usize = 1_024;

/// Max bytes for a maintenance issue description.
pub const MAX_DESCRIPTION_LEN: usize = 4_096;

/// Max rows accepted in a single timetable upload.
pub const MAX_UPLOAD_ROWS: usize = 10_000;

/// Max bookings retained per room (active and terminal).
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;
