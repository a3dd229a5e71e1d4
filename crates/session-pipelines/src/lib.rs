//! End-to-end flows over the public `wallet-session` API, driven by the
//! in-memory doubles of `wallet_session::testing`. The flows live in `tests/`.
