//! Per-client-IP and global connection admission.
//!
//! The controller keeps one [`IpState`] per client IP behind a single mutex.
//! The lock is held only for counter arithmetic. Entries disappear as soon as
//! their last connection is released.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::ServerConfig;
use crate::error::{Error, Result};

/// Length of the per-IP rate window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Admission {
    Admitted,
    /// The global connection cap is reached.
    RejectedGlobal,
    /// The client IP has too many open connections.
    RejectedPerIp,
    /// The client IP opened too many connections in the current window.
    RejectedRate,
}

impl Admission {
    #[must_use]
    pub const fn is_admitted(self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

impl fmt::Display for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Admission::Admitted => "admitted",
            Admission::RejectedGlobal => "global connection limit reached",
            Admission::RejectedPerIp => "per-IP connection limit reached",
            Admission::RejectedRate => "per-IP connection rate exceeded",
        })
    }
}

/// Counters tracked for one client IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpState {
    /// Open connections.
    pub current: usize,
    /// Connections admitted since `window_start`.
    pub minute_count: usize,
    pub window_start: Instant,
    /// Time of the last admission.
    pub last_seen: Instant,
}

impl IpState {
    fn fresh(now: Instant) -> Self {
        Self {
            current: 0,
            minute_count: 0,
            window_start: now,
            last_seen: now,
        }
    }
}

/// Limits enforced by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionLimits {
    pub max_connections: usize,
    pub max_connections_per_ip: usize,
    pub max_connections_per_minute: usize,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_connections: 50,
            max_connections_per_ip: 5,
            max_connections_per_minute: 10,
        }
    }
}

#[derive(Debug, Default)]
struct AdmissionTable {
    entries: HashMap<String, IpState>,
    global_current: usize,
}

impl AdmissionTable {
    /// Evaluate and, if admitted, record a connection from `ip`.
    ///
    /// `in_use` is the global count to test against, which differs from
    /// `global_current` while a slot is being handed over.
    fn admit(&mut self, ip: &str, now: Instant, in_use: usize, limits: &AdmissionLimits) -> Admission {
        if in_use >= limits.max_connections {
            return Admission::RejectedGlobal;
        }

        let existing = self.entries.get(ip).copied();
        let mut entry = existing.unwrap_or_else(|| IpState::fresh(now));
        if now.saturating_duration_since(entry.window_start) >= RATE_WINDOW {
            entry.minute_count = 0;
            entry.window_start = now;
        }

        let decision = if entry.current >= limits.max_connections_per_ip {
            Admission::RejectedPerIp
        } else if entry.minute_count >= limits.max_connections_per_minute {
            Admission::RejectedRate
        } else {
            entry.current += 1;
            entry.minute_count += 1;
            entry.last_seen = now;
            self.global_current += 1;
            Admission::Admitted
        };

        // A refused newcomer leaves no trace in the table.
        if decision.is_admitted() || existing.is_some() {
            self.entries.insert(ip.to_string(), entry);
        }
        decision
    }

    fn release(&mut self, ip: &str) -> bool {
        let Some(entry) = self.entries.get_mut(ip) else {
            return false;
        };
        entry.current = entry.current.saturating_sub(1);
        self.global_current = self.global_current.saturating_sub(1);
        if entry.current == 0 {
            self.entries.remove(ip);
        }
        true
    }
}

/// Thread-safe admission controller.
///
/// When constructed disabled every attempt is admitted and nothing is
/// tracked.
#[derive(Debug)]
pub struct AdmissionController {
    enabled: bool,
    limits: AdmissionLimits,
    table: Mutex<AdmissionTable>,
}

impl AdmissionController {
    #[must_use]
    pub fn new(enabled: bool, limits: AdmissionLimits) -> Self {
        Self {
            enabled,
            limits,
            table: Mutex::new(AdmissionTable::default()),
        }
    }

    /// Controller matching the server configuration.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.security_enabled,
            AdmissionLimits {
                max_connections: config.max_connections,
                max_connections_per_ip: config.max_connections_per_ip,
                max_connections_per_minute: config.max_connections_per_minute,
            },
        )
    }

    fn lock(&self) -> MutexGuard<'_, AdmissionTable> {
        // Counter updates cannot panic midway, so a poisoned table is still consistent.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn limits(&self) -> &AdmissionLimits {
        &self.limits
    }

    /// Try to admit a new connection from `ip`.
    pub fn try_admit(&self, ip: &str) -> Admission {
        self.try_admit_at(ip, Instant::now())
    }

    /// [`AdmissionController::try_admit`] with an explicit clock reading.
    pub fn try_admit_at(&self, ip: &str, now: Instant) -> Admission {
        if !self.enabled {
            return Admission::Admitted;
        }
        let decision = {
            let mut table = self.lock();
            let in_use = table.global_current;
            table.admit(ip, now, in_use, &self.limits)
        };
        if decision.is_admitted() {
            debug!(client_ip = ip, "connection admitted");
        } else {
            debug!(client_ip = ip, reason = %decision, "connection refused");
        }
        decision
    }

    /// Release one connection previously admitted for `ip`.
    pub fn release(&self, ip: &str) {
        if !self.enabled {
            return;
        }
        if !self.lock().release(ip) {
            debug!(client_ip = ip, "release for untracked client ignored");
        }
    }

    /// Admit `ip` and return a guard that releases it on drop.
    ///
    /// # Errors
    ///
    /// Returns `Error::AdmissionRefused` carrying the refusal reason.
    pub fn admit(self: &Arc<Self>, ip: &str) -> Result<AdmissionPermit> {
        match self.try_admit(ip) {
            Admission::Admitted => Ok(AdmissionPermit {
                controller: Arc::clone(self),
                ip: ip.to_string(),
            }),
            refused => Err(Error::AdmissionRefused(refused)),
        }
    }

    /// Move one admitted connection from `from` to `to`.
    ///
    /// `to` is checked against its own per-IP and rate limits; the global
    /// count is unchanged. On refusal nothing changes and `from` still holds
    /// its slot.
    pub fn transfer(&self, from: &str, to: &str) -> Admission {
        self.transfer_at(from, to, Instant::now())
    }

    /// [`AdmissionController::transfer`] with an explicit clock reading.
    pub fn transfer_at(&self, from: &str, to: &str, now: Instant) -> Admission {
        if !self.enabled || from == to {
            return Admission::Admitted;
        }
        let mut table = self.lock();
        let in_use = table.global_current.saturating_sub(1);
        let decision = table.admit(to, now, in_use, &self.limits);
        if decision.is_admitted() {
            table.release(from);
        }
        decision
    }

    /// Total open connections tracked.
    #[must_use]
    pub fn global_current(&self) -> usize {
        self.lock().global_current
    }

    /// Number of client IPs with at least one open connection.
    #[must_use]
    pub fn tracked_ips(&self) -> usize {
        self.lock().entries.len()
    }

    /// Snapshot of the counters for `ip`.
    #[must_use]
    pub fn entry(&self, ip: &str) -> Option<IpState> {
        self.lock().entries.get(ip).copied()
    }
}

/// An admitted connection; dropping it releases the admission exactly once.
#[derive(Debug)]
#[must_use = "the admission is released when the permit is dropped"]
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
    ip: String,
}

impl AdmissionPermit {
    /// The client IP this permit is accounted to.
    #[must_use]
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Re-account this connection to `to`; see [`AdmissionController::transfer`].
    pub fn transfer(&mut self, to: &str) -> Admission {
        let decision = self.controller.transfer(&self.ip, to);
        if decision.is_admitted() {
            self.ip = to.to_string();
        }
        decision
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.controller.release(&self.ip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(max_total: usize, per_ip: usize, per_minute: usize) -> Arc<AdmissionController> {
        Arc::new(AdmissionController::new(
            true,
            AdmissionLimits {
                max_connections: max_total,
                max_connections_per_ip: per_ip,
                max_connections_per_minute: per_minute,
            },
        ))
    }

    fn sum_current(ctrl: &AdmissionController, ips: &[&str]) -> usize {
        ips.iter().filter_map(|ip| ctrl.entry(ip)).map(|e| e.current).sum()
    }

    #[test]
    fn test_admit_and_release() {
        let ctrl = controller(10, 2, 10);
        assert_eq!(ctrl.try_admit("1.1.1.1"), Admission::Admitted);
        assert_eq!(ctrl.global_current(), 1);
        let entry = ctrl.entry("1.1.1.1").unwrap();
        assert_eq!(entry.current, 1);
        assert_eq!(entry.minute_count, 1);

        ctrl.release("1.1.1.1");
        assert_eq!(ctrl.global_current(), 0);
        assert_eq!(ctrl.tracked_ips(), 0);
        assert!(ctrl.entry("1.1.1.1").is_none());
    }

    #[test]
    fn test_per_ip_limit() {
        let ctrl = controller(10, 1, 10);
        assert_eq!(ctrl.try_admit("127.0.0.1"), Admission::Admitted);
        assert_eq!(ctrl.try_admit("127.0.0.1"), Admission::RejectedPerIp);
        assert_eq!(ctrl.try_admit("127.0.0.2"), Admission::Admitted);
        assert_eq!(ctrl.global_current(), 2);
    }

    #[test]
    fn test_global_limit_checked_first() {
        let ctrl = controller(2, 5, 10);
        assert!(ctrl.try_admit("a").is_admitted());
        assert!(ctrl.try_admit("b").is_admitted());
        assert_eq!(ctrl.try_admit("c"), Admission::RejectedGlobal);
        assert_eq!(ctrl.try_admit("a"), Admission::RejectedGlobal);
        // The refused newcomer is not tracked.
        assert!(ctrl.entry("c").is_none());
        assert_eq!(ctrl.tracked_ips(), 2);
    }

    #[test]
    fn test_rate_limit_within_window() {
        let ctrl = controller(100, 100, 10);
        let start = Instant::now();
        for i in 0..10 {
            assert_eq!(
                ctrl.try_admit_at("9.9.9.9", start + Duration::from_secs(i)),
                Admission::Admitted
            );
        }
        assert_eq!(
            ctrl.try_admit_at("9.9.9.9", start + Duration::from_secs(59)),
            Admission::RejectedRate
        );
        assert_eq!(ctrl.entry("9.9.9.9").unwrap().minute_count, 10);
    }

    #[test]
    fn test_window_resets_after_sixty_seconds() {
        let ctrl = controller(100, 100, 2);
        let start = Instant::now();
        assert!(ctrl.try_admit_at("9.9.9.9", start).is_admitted());
        assert!(ctrl.try_admit_at("9.9.9.9", start).is_admitted());
        assert_eq!(ctrl.try_admit_at("9.9.9.9", start), Admission::RejectedRate);

        let later = start + RATE_WINDOW;
        assert_eq!(ctrl.try_admit_at("9.9.9.9", later), Admission::Admitted);
        let entry = ctrl.entry("9.9.9.9").unwrap();
        assert_eq!(entry.minute_count, 1);
        assert_eq!(entry.window_start, later);
        assert_eq!(entry.current, 3);
    }

    #[test]
    fn test_per_ip_checked_before_rate() {
        let ctrl = controller(100, 1, 1);
        assert!(ctrl.try_admit("x").is_admitted());
        assert_eq!(ctrl.try_admit("x"), Admission::RejectedPerIp);
    }

    #[test]
    fn test_disabled_controller_admits_everything() {
        let ctrl = Arc::new(AdmissionController::new(
            false,
            AdmissionLimits {
                max_connections: 1,
                max_connections_per_ip: 1,
                max_connections_per_minute: 1,
            },
        ));
        for _ in 0..5 {
            assert_eq!(ctrl.try_admit("1.2.3.4"), Admission::Admitted);
        }
        ctrl.release("1.2.3.4");
        assert_eq!(ctrl.global_current(), 0);
        assert_eq!(ctrl.tracked_ips(), 0);
        assert!(ctrl.admit("1.2.3.4").is_ok());
    }

    #[test]
    fn test_release_of_unknown_ip_is_harmless() {
        let ctrl = controller(10, 10, 10);
        ctrl.release("never-seen");
        assert_eq!(ctrl.global_current(), 0);
    }

    #[test]
    fn test_permit_releases_once_on_drop() {
        let ctrl = controller(10, 10, 10);
        let first = ctrl.admit("5.5.5.5").unwrap();
        let second = ctrl.admit("5.5.5.5").unwrap();
        assert_eq!(first.ip(), "5.5.5.5");
        assert_eq!(ctrl.global_current(), 2);
        drop(first);
        assert_eq!(ctrl.global_current(), 1);
        drop(second);
        assert_eq!(ctrl.global_current(), 0);
        assert_eq!(ctrl.tracked_ips(), 0);
    }

    #[test]
    fn test_admit_refusal_is_an_error() {
        let ctrl = controller(10, 1, 10);
        let _held = ctrl.admit("5.5.5.5").unwrap();
        let err = ctrl.admit("5.5.5.5").unwrap_err();
        assert_eq!(err, Error::AdmissionRefused(Admission::RejectedPerIp));
    }

    #[test]
    fn test_transfer_moves_the_slot() {
        let ctrl = controller(1, 1, 10);
        let mut permit = ctrl.admit("127.0.0.1").unwrap();
        // The global cap of 1 does not block the hand-over.
        assert_eq!(permit.transfer("203.0.113.7"), Admission::Admitted);
        assert_eq!(permit.ip(), "203.0.113.7");
        assert!(ctrl.entry("127.0.0.1").is_none());
        assert_eq!(ctrl.entry("203.0.113.7").unwrap().current, 1);
        assert_eq!(ctrl.global_current(), 1);

        drop(permit);
        assert_eq!(ctrl.global_current(), 0);
        assert_eq!(ctrl.tracked_ips(), 0);
    }

    #[test]
    fn test_refused_transfer_keeps_original_slot() {
        let ctrl = controller(10, 1, 10);
        let _proxied = ctrl.admit("203.0.113.7").unwrap();
        let mut permit = ctrl.admit("127.0.0.1").unwrap();
        assert_eq!(permit.transfer("203.0.113.7"), Admission::RejectedPerIp);
        assert_eq!(permit.ip(), "127.0.0.1");
        assert_eq!(ctrl.global_current(), 2);
        drop(permit);
        assert_eq!(ctrl.global_current(), 1);
    }

    #[test]
    fn test_transfer_to_same_ip_is_noop() {
        let ctrl = controller(10, 1, 1);
        let mut permit = ctrl.admit("a").unwrap();
        assert!(permit.transfer("a").is_admitted());
        assert_eq!(ctrl.entry("a").unwrap().minute_count, 1);
    }

    #[test]
    fn test_counters_stay_consistent_across_threads() {
        let ctrl = controller(40, 5, 1000);
        let ips = ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"];
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ctrl = Arc::clone(&ctrl);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let ip = ips[(t + i) % ips.len()];
                        if ctrl.try_admit(ip).is_admitted() {
                            let entry = ctrl.entry(ip).unwrap();
                            assert!(entry.current <= 5);
                            ctrl.release(ip);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(ctrl.global_current(), sum_current(&ctrl, &ips));
        assert_eq!(ctrl.global_current(), 0);
        assert_eq!(ctrl.tracked_ips(), 0);
    }
}
