//! End-to-end checks over the HTTP surface; see `tests/`.
