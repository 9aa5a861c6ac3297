#![allow(dead_code)]

use std::path::PathBuf;

use axum::Router;
use slothold::config::Config;
use slothold::server::{self, AppState};
use ulid::Ulid;

pub const TOKEN: &str = "secret";
pub const DAY: &str = "2025-03-01";

/// Slots 42, 43 open on 2025-03-01, 44 already booked, 50 on a closed day.
pub const SEED: &str = r#"{
    "enabled_days": ["2025-03-01"],
    "slots": [
        {"slot_id": 42, "day": "2025-03-01"},
        {"slot_id": 43, "day": "2025-03-01"},
        {"slot_id": 44, "day": "2025-03-01", "booked": true},
        {"slot_id": 50, "day": "2025-03-02"}
    ]
}"#;

fn seeded_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("slothold_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("default.json"), SEED).unwrap();
    dir
}

pub fn test_config() -> Config {
    Config {
        data_dir: seeded_dir(),
        token: TOKEN.into(),
        ..Config::default()
    }
}

pub fn test_state() -> AppState {
    AppState::new(&test_config())
}

pub fn test_app(state: &AppState) -> Router {
    server::router(state.clone())
}
