use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::error::AppointmentError;
use crate::models::{Appointment, AppointmentState};

// Pure scheduling rules. No I/O here: callers pass the current instant and
// any live counts in, decisions come back as typed errors.

/// Hour 0-23 with optional zero padding, exactly two minute digits.
static SLOT_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01]?\d|2[0-3]):[0-5]\d$").unwrap());

/// Reasons offered by the booking form; always accepted regardless of length.
pub const CANONICAL_REASONS: [&str; 10] = [
    "Consulta general",
    "Limpieza dental",
    "Extracción",
    "Endodoncia",
    "Ortodoncia",
    "Implantes",
    "Blanqueamiento",
    "Urgencia dental",
    "Control post-tratamiento",
    "Otro",
];

pub const REASON_MIN_CHARS: usize = 5;
pub const REASON_MAX_CHARS: usize = 200;
pub const DESCRIPTION_MAX_CHARS: usize = 300;

#[derive(Debug, Clone, Copy)]
pub struct PolicyConfig {
    pub max_active_per_patient: i64,
    pub cancel_cutoff: Duration,
    pub modify_window: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            max_active_per_patient: crate::config::DEFAULT_MAX_ACTIVE_APPOINTMENTS,
            cancel_cutoff: Duration::hours(crate::config::DEFAULT_CANCEL_CUTOFF_HOURS),
            modify_window: Duration::hours(crate::config::DEFAULT_MODIFY_WINDOW_HOURS),
        }
    }
}

/// Who is asking. `System` is the sweeper; it never arrives via HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Patient(Uuid),
    Admin(Uuid),
    System,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        matches!(self, Caller::Admin(_))
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Caller::Patient(id) | Caller::Admin(id) => Some(*id),
            Caller::System => None,
        }
    }

    pub fn owns(&self, appt: &Appointment) -> bool {
        self.user_id() == Some(appt.patient_id)
    }
}

pub fn ensure_admin(caller: &Caller) -> Result<(), AppointmentError> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(AppointmentError::Forbidden(
            "administrator role required".into(),
        ))
    }
}

/* -------------------------
   Field validation
--------------------------*/

pub fn parse_slot_date(raw: &str) -> Result<NaiveDate, AppointmentError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        AppointmentError::Validation("slot_date must be YYYY-MM-DD".into())
    })
}

pub fn parse_slot_time(raw: &str) -> Result<NaiveTime, AppointmentError> {
    let raw = raw.trim();
    if !SLOT_TIME_RE.is_match(raw) {
        return Err(AppointmentError::Validation(
            "slot_time must be HH:MM (00:00-23:59)".into(),
        ));
    }
    let Some((h, m)) = raw.split_once(':') else {
        return Err(AppointmentError::Validation(
            "slot_time must be HH:MM (00:00-23:59)".into(),
        ));
    };
    let (Ok(hour), Ok(minute)) = (h.parse::<u32>(), m.parse::<u32>()) else {
        return Err(AppointmentError::Validation(
            "slot_time must be HH:MM (00:00-23:59)".into(),
        ));
    };
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| {
        AppointmentError::Validation("slot_time must be HH:MM (00:00-23:59)".into())
    })
}

/// Civil-date granularity: booking later today is allowed, yesterday is not.
pub fn validate_slot_date(date: NaiveDate, today: NaiveDate) -> Result<(), AppointmentError> {
    if date < today {
        return Err(AppointmentError::Validation(
            "slot_date cannot be in the past".into(),
        ));
    }
    Ok(())
}

pub fn validate_reason(reason: &str) -> Result<String, AppointmentError> {
    let reason = reason.trim();
    if CANONICAL_REASONS.contains(&reason) {
        return Ok(reason.to_string());
    }
    let len = reason.chars().count();
    if len < REASON_MIN_CHARS {
        return Err(AppointmentError::Validation(format!(
            "reason must be at least {REASON_MIN_CHARS} characters"
        )));
    }
    if len > REASON_MAX_CHARS {
        return Err(AppointmentError::Validation(format!(
            "reason must be at most {REASON_MAX_CHARS} characters"
        )));
    }
    Ok(reason.to_string())
}

pub fn validate_extra_description(
    description: Option<&str>,
) -> Result<Option<String>, AppointmentError> {
    match description.map(str::trim) {
        None => Ok(None),
        Some("") => Ok(None),
        Some(d) => {
            if d.chars().count() > DESCRIPTION_MAX_CHARS {
                return Err(AppointmentError::Validation(format!(
                    "extra_description must be at most {DESCRIPTION_MAX_CHARS} characters"
                )));
            }
            Ok(Some(d.to_string()))
        }
    }
}

pub fn check_quota(active_count: i64, limit: i64) -> Result<(), AppointmentError> {
    if active_count >= limit {
        return Err(AppointmentError::QuotaExceeded { limit });
    }
    Ok(())
}

/* -------------------------
   Transition + access gates
--------------------------*/

/// Error for a (from, to) pair that is off the transition graph. Also used
/// to classify a compare-and-set that lost a race.
pub fn transition_conflict(from: AppointmentState, to: AppointmentState) -> AppointmentError {
    use AppointmentState::*;
    match (from, to) {
        (Cancelled, Cancelled) => AppointmentError::AlreadyCancelled,
        (Completed, Cancelled) | (NoShow, Cancelled) => AppointmentError::NotCancellable,
        (from, to) => AppointmentError::InvalidTransition { from, to },
    }
}

/// The full transition graph with its role gates:
///
///   requested -> scheduled   admin
///   requested -> cancelled   owner or admin
///   scheduled -> cancelled   owner inside the cutoff window, admin any time
///   scheduled -> completed   admin
///   scheduled -> no_show     system (sweeper)
pub fn can_transition(
    caller: &Caller,
    appt: &Appointment,
    target: AppointmentState,
    now: DateTime<Utc>,
    cfg: &PolicyConfig,
) -> Result<(), AppointmentError> {
    use AppointmentState::*;
    match (appt.status, target) {
        (Requested, Scheduled) => ensure_admin(caller),
        (Requested, Cancelled) => {
            if caller.is_admin() || caller.owns(appt) {
                Ok(())
            } else {
                Err(AppointmentError::Forbidden(
                    "only the owner or an administrator can cancel".into(),
                ))
            }
        }
        (Scheduled, Cancelled) => {
            if caller.is_admin() {
                return Ok(());
            }
            if !caller.owns(appt) {
                return Err(AppointmentError::Forbidden(
                    "only the owner or an administrator can cancel".into(),
                ));
            }
            if now >= appt.slot_instant() - cfg.cancel_cutoff {
                return Err(AppointmentError::Forbidden(format!(
                    "cancellation closes {}h before the slot",
                    cfg.cancel_cutoff.num_hours()
                )));
            }
            Ok(())
        }
        (Scheduled, Completed) => ensure_admin(caller),
        (Scheduled, NoShow) => {
            if *caller == Caller::System {
                Ok(())
            } else {
                Err(AppointmentError::Forbidden(
                    "no_show is applied by the expiry sweeper only".into(),
                ))
            }
        }
        (from, to) => Err(transition_conflict(from, to)),
    }
}

pub fn can_view(caller: &Caller, appt: &Appointment) -> Result<(), AppointmentError> {
    if caller.is_admin() || caller.owns(appt) {
        Ok(())
    } else {
        Err(AppointmentError::Forbidden(
            "appointment belongs to another patient".into(),
        ))
    }
}

/// Error for a field patch against a row that is not open. Also used to
/// classify a patch whose write lost a race with a transition, so both
/// paths refuse identically.
pub fn update_conflict(state: AppointmentState) -> AppointmentError {
    AppointmentError::Validation(format!(
        "a {} appointment can no longer be edited",
        state.as_str()
    ))
}

pub fn can_update(caller: &Caller, appt: &Appointment) -> Result<(), AppointmentError> {
    if !caller.is_admin() && !caller.owns(appt) {
        return Err(AppointmentError::Forbidden(
            "appointment belongs to another patient".into(),
        ));
    }
    if !appt.status.is_open() {
        return Err(update_conflict(appt.status));
    }
    Ok(())
}

/// Dashboard flags: can the owner still cancel / still move this one.
/// Two independent windows; the cancel cutoff is the hard rule, the modify
/// window is a display convention.
pub fn display_flags(appt: &Appointment, now: DateTime<Utc>, cfg: &PolicyConfig) -> (bool, bool) {
    if !appt.status.is_open() {
        return (false, false);
    }
    let slot = appt.slot_instant();
    let can_cancel = now < slot - cfg.cancel_cutoff;
    let can_modify = now < slot - cfg.modify_window;
    (can_cancel, can_modify)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn appt(status: AppointmentState, patient: Uuid, date: NaiveDate, time: NaiveTime) -> Appointment {
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        Appointment {
            appointment_id: Uuid::new_v4(),
            patient_id: patient,
            slot_date: date,
            slot_time: time,
            reason: "Limpieza dental".into(),
            extra_description: None,
            status,
            notes: None,
            created_at: created,
            updated_at: created,
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_slot_time_accepts_padded_and_unpadded_hours() {
        assert_eq!(parse_slot_time("09:30").unwrap(), t(9, 30));
        assert_eq!(parse_slot_time("9:30").unwrap(), t(9, 30));
        assert_eq!(parse_slot_time("23:59").unwrap(), t(23, 59));
        assert_eq!(parse_slot_time("0:00").unwrap(), t(0, 0));
        assert_eq!(parse_slot_time(" 14:05 ").unwrap(), t(14, 5));
    }

    #[test]
    fn test_slot_time_rejects_malformed_input() {
        for bad in ["24:00", "9:3", "09:60", "", "930", "12:345", "ab:cd", "-1:30"] {
            assert_matches!(parse_slot_time(bad), Err(AppointmentError::Validation(_)), "{bad}");
        }
    }

    #[test]
    fn test_slot_date_must_be_today_or_later() {
        let today = d(2026, 3, 10);
        assert!(validate_slot_date(d(2026, 3, 10), today).is_ok());
        assert!(validate_slot_date(d(2026, 3, 11), today).is_ok());
        assert_matches!(
            validate_slot_date(d(2026, 3, 9), today),
            Err(AppointmentError::Validation(_))
        );
    }

    #[test]
    fn test_canonical_reasons_always_pass() {
        for r in CANONICAL_REASONS {
            assert_eq!(validate_reason(r).unwrap(), r);
        }
        // "Otro" is under the free-text minimum but still canonical
        assert!(validate_reason("Otro").is_ok());
    }

    #[test]
    fn test_free_text_reason_length_bounds() {
        assert!(validate_reason("Dolor de muela").is_ok());
        assert!(validate_reason("Ayuda").is_ok()); // exactly 5 chars
        assert_matches!(validate_reason("Hola"), Err(AppointmentError::Validation(_)));
        assert_matches!(validate_reason("  ab  "), Err(AppointmentError::Validation(_)));
        let long = "x".repeat(201);
        assert_matches!(validate_reason(&long), Err(AppointmentError::Validation(_)));
        assert!(validate_reason(&"x".repeat(200)).is_ok());
    }

    #[test]
    fn test_description_is_optional_and_bounded() {
        assert_eq!(validate_extra_description(None).unwrap(), None);
        assert_eq!(validate_extra_description(Some("  ")).unwrap(), None);
        assert_eq!(
            validate_extra_description(Some("traer radiografías")).unwrap(),
            Some("traer radiografías".to_string())
        );
        let long = "y".repeat(301);
        assert_matches!(
            validate_extra_description(Some(&long)),
            Err(AppointmentError::Validation(_))
        );
        assert!(validate_extra_description(Some(&"y".repeat(300))).is_ok());
    }

    #[test]
    fn test_quota_blocks_at_limit() {
        assert!(check_quota(0, 3).is_ok());
        assert!(check_quota(2, 3).is_ok());
        assert_matches!(check_quota(3, 3), Err(AppointmentError::QuotaExceeded { limit: 3 }));
        assert_matches!(check_quota(4, 3), Err(AppointmentError::QuotaExceeded { .. }));
    }

    #[test]
    fn test_authorize_is_admin_only() {
        let patient = Uuid::new_v4();
        let cfg = PolicyConfig::default();
        let a = appt(AppointmentState::Requested, patient, d(2026, 6, 1), t(10, 0));
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();

        assert!(can_transition(&Caller::Admin(Uuid::new_v4()), &a, AppointmentState::Scheduled, now, &cfg).is_ok());
        assert_matches!(
            can_transition(&Caller::Patient(patient), &a, AppointmentState::Scheduled, now, &cfg),
            Err(AppointmentError::Forbidden(_))
        );
    }

    #[test]
    fn test_requested_cancel_needs_owner_or_admin() {
        let patient = Uuid::new_v4();
        let cfg = PolicyConfig::default();
        let a = appt(AppointmentState::Requested, patient, d(2026, 6, 1), t(10, 0));
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();

        assert!(can_transition(&Caller::Patient(patient), &a, AppointmentState::Cancelled, now, &cfg).is_ok());
        assert!(can_transition(&Caller::Admin(Uuid::new_v4()), &a, AppointmentState::Cancelled, now, &cfg).is_ok());
        assert_matches!(
            can_transition(&Caller::Patient(Uuid::new_v4()), &a, AppointmentState::Cancelled, now, &cfg),
            Err(AppointmentError::Forbidden(_))
        );
    }

    #[test]
    fn test_scheduled_cancel_respects_the_cutoff() {
        let patient = Uuid::new_v4();
        let cfg = PolicyConfig::default();
        let a = appt(AppointmentState::Scheduled, patient, d(2026, 6, 1), t(10, 0));
        // slot instant is 2026-06-01T10:00Z; cutoff is 2h
        let three_before = Utc.with_ymd_and_hms(2026, 6, 1, 7, 0, 0).unwrap();
        let one_before = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        let exactly_cutoff = Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap();

        assert!(can_transition(&Caller::Patient(patient), &a, AppointmentState::Cancelled, three_before, &cfg).is_ok());
        assert_matches!(
            can_transition(&Caller::Patient(patient), &a, AppointmentState::Cancelled, one_before, &cfg),
            Err(AppointmentError::Forbidden(_))
        );
        // the boundary itself is already closed
        assert_matches!(
            can_transition(&Caller::Patient(patient), &a, AppointmentState::Cancelled, exactly_cutoff, &cfg),
            Err(AppointmentError::Forbidden(_))
        );
        // admins are not window-bound
        assert!(can_transition(&Caller::Admin(Uuid::new_v4()), &a, AppointmentState::Cancelled, one_before, &cfg).is_ok());
    }

    #[test]
    fn test_no_show_is_system_only() {
        let patient = Uuid::new_v4();
        let cfg = PolicyConfig::default();
        let a = appt(AppointmentState::Scheduled, patient, d(2026, 6, 1), t(10, 0));
        let now = Utc.with_ymd_and_hms(2026, 6, 4, 9, 0, 0).unwrap();

        assert!(can_transition(&Caller::System, &a, AppointmentState::NoShow, now, &cfg).is_ok());
        assert_matches!(
            can_transition(&Caller::Admin(Uuid::new_v4()), &a, AppointmentState::NoShow, now, &cfg),
            Err(AppointmentError::Forbidden(_))
        );
        assert_matches!(
            can_transition(&Caller::Patient(patient), &a, AppointmentState::NoShow, now, &cfg),
            Err(AppointmentError::Forbidden(_))
        );
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_edges() {
        use AppointmentState::*;
        let patient = Uuid::new_v4();
        let cfg = PolicyConfig::default();
        let admin = Caller::Admin(Uuid::new_v4());
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();

        for terminal in [Completed, Cancelled, NoShow] {
            let a = appt(terminal, patient, d(2026, 6, 1), t(10, 0));
            for target in [Requested, Scheduled, Completed, NoShow] {
                assert_matches!(
                    can_transition(&admin, &a, target, now, &cfg),
                    Err(AppointmentError::InvalidTransition { .. }),
                    "{terminal:?} -> {target:?}"
                );
            }
        }

        let cancelled = appt(Cancelled, patient, d(2026, 6, 1), t(10, 0));
        assert_matches!(
            can_transition(&admin, &cancelled, Cancelled, now, &cfg),
            Err(AppointmentError::AlreadyCancelled)
        );

        for done in [Completed, NoShow] {
            let a = appt(done, patient, d(2026, 6, 1), t(10, 0));
            assert_matches!(
                can_transition(&admin, &a, Cancelled, now, &cfg),
                Err(AppointmentError::NotCancellable)
            );
        }
    }

    #[test]
    fn test_view_is_owner_or_admin() {
        let patient = Uuid::new_v4();
        let a = appt(AppointmentState::Requested, patient, d(2026, 6, 1), t(10, 0));

        assert!(can_view(&Caller::Patient(patient), &a).is_ok());
        assert!(can_view(&Caller::Admin(Uuid::new_v4()), &a).is_ok());
        assert_matches!(
            can_view(&Caller::Patient(Uuid::new_v4()), &a),
            Err(AppointmentError::Forbidden(_))
        );
    }

    #[test]
    fn test_closed_appointments_cannot_be_edited() {
        let patient = Uuid::new_v4();
        let open = appt(AppointmentState::Scheduled, patient, d(2026, 6, 1), t(10, 0));
        assert!(can_update(&Caller::Patient(patient), &open).is_ok());

        let done = appt(AppointmentState::Completed, patient, d(2026, 6, 1), t(10, 0));
        assert_matches!(
            can_update(&Caller::Admin(Uuid::new_v4()), &done),
            Err(AppointmentError::Validation(_))
        );
    }

    #[test]
    fn test_display_flags_use_their_own_windows() {
        let patient = Uuid::new_v4();
        let cfg = PolicyConfig::default();
        let a = appt(AppointmentState::Scheduled, patient, d(2026, 6, 2), t(12, 0));
        // slot instant 2026-06-02T12:00Z; cancel cutoff 2h, modify window 24h

        let far = Utc.with_ymd_and_hms(2026, 5, 30, 12, 0, 0).unwrap();
        assert_eq!(display_flags(&a, far, &cfg), (true, true));

        let twelve_hours_before = Utc.with_ymd_and_hms(2026, 6, 2, 0, 0, 0).unwrap();
        assert_eq!(display_flags(&a, twelve_hours_before, &cfg), (true, false));

        let one_hour_before = Utc.with_ymd_and_hms(2026, 6, 2, 11, 0, 0).unwrap();
        assert_eq!(display_flags(&a, one_hour_before, &cfg), (false, false));

        let done = appt(AppointmentState::Completed, patient, d(2026, 6, 2), t(12, 0));
        assert_eq!(display_flags(&done, far, &cfg), (false, false));
    }
}
