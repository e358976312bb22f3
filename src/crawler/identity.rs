//! Identity pool
//!
//! Supplies client-presentation profiles to target sessions and keeps
//! recently burned profiles out of rotation for a cool-down period.

use crate::config::{IdentityConfig, IdentityProfile, RotationMode};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A client-presentation profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub name: String,
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub locale: String,
    pub timezone: String,
}

impl Identity {
    /// Profile used when the job file declares none
    pub fn fallback() -> Self {
        Self {
            name: "desktop-chrome".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            viewport: (1920, 1080),
            locale: "en-CA".to_string(),
            timezone: "America/Edmonton".to_string(),
        }
    }
}

impl From<&IdentityProfile> for Identity {
    fn from(profile: &IdentityProfile) -> Self {
        Self {
            name: profile.name.clone(),
            user_agent: profile.user_agent.clone(),
            viewport: (profile.viewport_width, profile.viewport_height),
            locale: profile.locale.clone(),
            timezone: profile.timezone.clone(),
        }
    }
}

/// Pool of identities shared by every target of one job
#[derive(Debug)]
pub struct IdentityPool {
    identities: Vec<Identity>,
    mode: RotationMode,
    cooldown: Duration,
    cursor: usize,
    cooling: HashMap<String, Instant>,
}

impl IdentityPool {
    /// Builds a pool from the job's identity section
    pub fn new(config: &IdentityConfig) -> Self {
        let mut identities: Vec<Identity> = config.profiles.iter().map(Identity::from).collect();
        if identities.is_empty() {
            identities.push(Identity::fallback());
        }

        Self {
            identities,
            mode: config.rotation,
            cooldown: Duration::from_secs(config.cooldown_secs),
            cursor: 0,
            cooling: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Returns the next identity that is not cooling down
    ///
    /// When every identity is cooling down the one whose cool-down ends
    /// soonest is handed out anyway, so acquisition never blocks.
    pub fn acquire_identity(&mut self) -> Identity {
        self.acquire_at(Instant::now())
    }

    /// Puts an identity into cool-down after its session was aborted
    pub fn retire(&mut self, identity: &Identity) {
        self.retire_at(identity, Instant::now());
    }

    /// Number of identities usable right now
    pub fn available(&self) -> usize {
        let now = Instant::now();
        self.identities
            .iter()
            .filter(|i| !self.is_cooling(&i.name, now))
            .count()
    }

    fn acquire_at(&mut self, now: Instant) -> Identity {
        self.cooling.retain(|_, until| *until > now);

        let candidates: Vec<usize> = (0..self.identities.len())
            .filter(|i| !self.is_cooling(&self.identities[*i].name, now))
            .collect();

        let index = if candidates.is_empty() {
            tracing::warn!(
                "All {} identities are cooling down, reusing the least recently retired",
                self.identities.len()
            );
            self.soonest_available()
        } else {
            match self.mode {
                RotationMode::RoundRobin => {
                    let n = self.identities.len();
                    let next = (0..n)
                        .map(|offset| (self.cursor + offset) % n)
                        .find(|i| candidates.contains(i))
                        .unwrap_or(candidates[0]);
                    self.cursor = (next + 1) % n;
                    next
                }
                RotationMode::Random => {
                    candidates[rand::thread_rng().gen_range(0..candidates.len())]
                }
            }
        };

        self.identities[index].clone()
    }

    fn retire_at(&mut self, identity: &Identity, now: Instant) {
        tracing::debug!("Retiring identity {} for {:?}", identity.name, self.cooldown);
        self.cooling.insert(identity.name.clone(), now + self.cooldown);
    }

    fn is_cooling(&self, name: &str, now: Instant) -> bool {
        self.cooling.get(name).is_some_and(|until| *until > now)
    }

    fn soonest_available(&self) -> usize {
        self.identities
            .iter()
            .enumerate()
            .min_by_key(|(_, i)| self.cooling.get(&i.name).copied())
            .map(|(index, _)| index)
            .unwrap_or(0)
    }
}
