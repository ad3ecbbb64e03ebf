use std::env;

pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;
pub const DEFAULT_NO_SHOW_GRACE_HOURS: i64 = 48;
pub const DEFAULT_CANCEL_CUTOFF_HOURS: i64 = 2;
pub const DEFAULT_MODIFY_WINDOW_HOURS: i64 = 24;
pub const DEFAULT_MAX_ACTIVE_APPOINTMENTS: i64 = 3;
pub const DEFAULT_SWEEP_INTERVAL_MINUTES: u64 = 60;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    /// Hours past the slot before a scheduled appointment becomes no_show.
    pub no_show_grace_hours: i64,
    /// Hours before the slot after which patients can no longer cancel.
    pub cancel_cutoff_hours: i64,
    /// Hours before the slot after which the dashboard stops offering edits.
    pub modify_window_hours: i64,
    pub max_active_appointments: i64,
    pub sweep_interval_minutes: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let session_ttl_hours = parse_i64("SESSION_TTL_HOURS", DEFAULT_SESSION_TTL_HOURS);
        let no_show_grace_hours = parse_i64("NO_SHOW_GRACE_HOURS", DEFAULT_NO_SHOW_GRACE_HOURS);
        let cancel_cutoff_hours = parse_i64("CANCEL_CUTOFF_HOURS", DEFAULT_CANCEL_CUTOFF_HOURS);
        let modify_window_hours = parse_i64("MODIFY_WINDOW_HOURS", DEFAULT_MODIFY_WINDOW_HOURS);
        let max_active_appointments =
            parse_i64("MAX_ACTIVE_APPOINTMENTS", DEFAULT_MAX_ACTIVE_APPOINTMENTS);
        let sweep_interval_minutes = env::var("SWEEP_INTERVAL_MINUTES")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_MINUTES);

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            no_show_grace_hours,
            cancel_cutoff_hours,
            modify_window_hours,
            max_active_appointments,
            sweep_interval_minutes,
        })
    }
}

fn parse_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(default)
}
