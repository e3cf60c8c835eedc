//! Integration tests live in `tests/`; this crate body is intentionally empty.
