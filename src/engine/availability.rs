use crate::model::*;

// ── Free-slot computation ────────────────────────────────────────

/// Remove `remove` from every slot in `free`.
///
/// Fully covered slots are dropped, disjoint ones kept, and partially covered
/// ones split into whatever survives on the left and right.
pub fn subtract(free: &[Span], remove: &Span) -> Vec<Span> {
    let mut result = Vec::with_capacity(free.len() + 1);
    for &slot in free {
        if !slot.overlaps(remove) {
            result.push(slot);
            continue;
        }
        if slot.start < remove.start {
            result.push(Span::new(slot.start, remove.start));
        }
        if remove.end < slot.end {
            result.push(Span::new(remove.end, slot.end));
        }
    }
    result
}

/// Free windows inside `envelope`: fold `subtract` over every lecture, then
/// every booking. Callers pass active bookings only.
pub fn free_slots<'a>(
    envelope: Span,
    lectures: &[Lecture],
    bookings: impl IntoIterator<Item = &'a Booking>,
) -> Vec<Span> {
    let mut free = vec![envelope];
    for lecture in lectures {
        free = subtract(&free, &lecture.span);
    }
    for booking in bookings {
        free = subtract(&free, &booking.span);
    }
    free
}
