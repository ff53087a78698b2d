//! SIM registry implementation

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rand::Rng;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::domain::{Carrier, Device, DeviceId, Sim, SimId};
use crate::error::{Result, UssdError};
use crate::state::StateManager;

use super::config::RegistryConfig;

/// Current local calendar date; quotas reset when it changes
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Per-SIM state plus the lease serializing executions on it
struct SimSlot {
    /// Guards the counter; held only for check-and-update
    sim: Mutex<Sim>,
    /// Held for the whole duration of an execution on this SIM
    lease: Arc<Mutex<()>>,
}

impl SimSlot {
    fn new(sim: Sim) -> Arc<Self> {
        Arc::new(Self {
            sim: Mutex::new(sim),
            lease: Arc::new(Mutex::new(())),
        })
    }
}

/// Registry of devices and their SIMs
///
/// Every SIM has its own lock, so usage increments and daily resets on one
/// SIM never contend with another SIM.
pub struct SimRegistry {
    config: RegistryConfig,
    devices: RwLock<BTreeMap<DeviceId, Device>>,
    sims: RwLock<BTreeMap<SimId, Arc<SimSlot>>>,
    state: StateManager,
}

impl SimRegistry {
    /// Create an empty registry
    pub fn new(config: RegistryConfig, state: StateManager) -> Self {
        debug!(?config, "SimRegistry::new: called");
        Self::from_records(config, state, Vec::new(), Vec::new())
    }

    /// Create a registry hydrated from stored records
    pub fn from_records(config: RegistryConfig, state: StateManager, devices: Vec<Device>, sims: Vec<Sim>) -> Self {
        debug!(
            device_count = devices.len(),
            sim_count = sims.len(),
            "SimRegistry::from_records: called"
        );
        for sim in sims.iter().filter(|s| s.used_today > s.daily_quota) {
            warn!(
                sim_id = %sim.id,
                used_today = sim.used_today,
                daily_quota = sim.daily_quota,
                "SIM loaded over quota"
            );
        }
        Self {
            config,
            devices: RwLock::new(devices.into_iter().map(|d| (d.id.clone(), d)).collect()),
            sims: RwLock::new(sims.into_iter().map(|s| (s.id.clone(), SimSlot::new(s))).collect()),
            state,
        }
    }

    async fn slot(&self, sim_id: &str) -> Result<Arc<SimSlot>> {
        self.sims
            .read()
            .await
            .get(sim_id)
            .cloned()
            .ok_or_else(|| UssdError::not_found("SIM", sim_id))
    }

    // === Devices ===

    /// Register a device and provision its SIMs with random carriers
    pub async fn register_device(&self, name: &str, sim_count: Option<u32>) -> Result<(Device, Vec<Sim>)> {
        debug!(%name, ?sim_count, "SimRegistry::register_device: called");
        let name = name.trim();
        if name.is_empty() {
            return Err(UssdError::InvalidInput("device name must not be empty".to_string()));
        }
        if self.config.default_daily_quota == 0 {
            return Err(UssdError::InvalidInput("default daily quota must be positive".to_string()));
        }

        let sim_count = sim_count.unwrap_or(self.config.sims_per_device);
        let device = Device::new(name, sim_count);
        let today = today();
        let sims: Vec<Sim> = {
            let mut rng = rand::rng();
            (0..sim_count)
                .map(|_| {
                    let carrier = Carrier::ALL[rng.random_range(0..Carrier::ALL.len())];
                    let phone = format!("+212{}", rng.random_range(600_000_000u32..700_000_000));
                    Sim::new(device.id.clone(), phone, carrier, self.config.default_daily_quota, today)
                })
                .collect()
        };

        self.state.persist_device(device.clone()).await?;
        for sim in &sims {
            self.state.persist_sim(sim.clone()).await?;
        }

        self.devices.write().await.insert(device.id.clone(), device.clone());
        let mut slots = self.sims.write().await;
        for sim in &sims {
            slots.insert(sim.id.clone(), SimSlot::new(sim.clone()));
        }

        info!(device_id = %device.id, sim_count, "Registered device");
        Ok((device, sims))
    }

    /// Add a SIM with explicit attributes to an existing device
    pub async fn add_sim(
        &self,
        device_id: &str,
        phone_number: &str,
        carrier: Carrier,
        daily_quota: Option<u32>,
    ) -> Result<Sim> {
        debug!(%device_id, %phone_number, %carrier, ?daily_quota, "SimRegistry::add_sim: called");
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| UssdError::not_found("device", device_id))?;

        let quota = daily_quota.unwrap_or(self.config.default_daily_quota);
        if quota == 0 {
            return Err(UssdError::InvalidInput("daily quota must be positive".to_string()));
        }
        let sim = Sim::new(device_id, phone_number, carrier, quota, today());

        let mut updated = device.clone();
        updated.sim_count += 1;
        self.state.persist_sim(sim.clone()).await?;
        self.state.persist_device(updated.clone()).await?;
        *device = updated;

        self.sims.write().await.insert(sim.id.clone(), SimSlot::new(sim.clone()));
        Ok(sim)
    }

    /// All devices, newest first
    pub async fn list_devices(&self) -> Vec<Device> {
        debug!("SimRegistry::list_devices: called");
        let mut devices: Vec<Device> = self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        devices
    }

    pub async fn get_device(&self, id: &str) -> Result<Device> {
        debug!(%id, "SimRegistry::get_device: called");
        self.devices
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| UssdError::not_found("device", id))
    }

    /// Heartbeat: mark a device online and stamp last-seen
    pub async fn touch_device(&self, id: &str) -> Result<Device> {
        debug!(%id, "SimRegistry::touch_device: called");
        let mut devices = self.devices.write().await;
        let device = devices.get_mut(id).ok_or_else(|| UssdError::not_found("device", id))?;

        let mut updated = device.clone();
        updated.touch(Utc::now());
        self.state.persist_device(updated.clone()).await?;
        *device = updated.clone();
        Ok(updated)
    }

    // === SIMs ===

    /// Snapshot of every SIM, oldest first
    pub async fn list_sims(&self) -> Vec<Sim> {
        debug!("SimRegistry::list_sims: called");
        let slots: Vec<Arc<SimSlot>> = self.sims.read().await.values().cloned().collect();
        let mut sims = Vec::with_capacity(slots.len());
        for slot in slots {
            sims.push(slot.sim.lock().await.clone());
        }
        sims.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sims
    }

    pub async fn sims_for_device(&self, device_id: &str) -> Vec<Sim> {
        debug!(%device_id, "SimRegistry::sims_for_device: called");
        self.list_sims()
            .await
            .into_iter()
            .filter(|s| s.device_id == device_id)
            .collect()
    }

    /// Snapshot of one SIM
    pub async fn get_sim(&self, id: &str) -> Result<Sim> {
        debug!(%id, "SimRegistry::get_sim: called");
        let slot = self.slot(id).await?;
        let sim = slot.sim.lock().await.clone();
        Ok(sim)
    }

    /// Snapshot of one SIM after applying the date roll-over
    pub async fn refresh_sim(&self, id: &str, today: NaiveDate) -> Result<Sim> {
        debug!(%id, %today, "SimRegistry::refresh_sim: called");
        let slot = self.slot(id).await?;
        let mut sim = slot.sim.lock().await;
        let mut next = sim.clone();
        if next.roll_over(today) {
            self.state.persist_sim(next.clone()).await?;
            *sim = next.clone();
        }
        Ok(next)
    }

    /// Record one execution against today's quota
    pub async fn record_usage(&self, id: &str) -> Result<Sim> {
        self.record_usage_on(id, today()).await
    }

    /// Atomically roll over, check and increment the SIM's usage counter
    ///
    /// Fails with `QuotaExceeded` (leaving the counter untouched) when the
    /// increment would pass the daily quota. The store is written before the
    /// in-memory counter changes, so a failed write leaves both unchanged.
    pub async fn record_usage_on(&self, id: &str, today: NaiveDate) -> Result<Sim> {
        debug!(%id, %today, "SimRegistry::record_usage_on: called");
        let slot = self.slot(id).await?;
        let mut sim = slot.sim.lock().await;

        let mut next = sim.clone();
        let rolled = next.roll_over(today);

        if next.used_today >= next.daily_quota {
            debug!(%id, used_today = next.used_today, "SimRegistry::record_usage_on: quota exhausted");
            if rolled {
                self.state.persist_sim(next.clone()).await?;
                *sim = next.clone();
            }
            return Err(UssdError::QuotaExceeded {
                sim_id: id.to_string(),
                used: next.used_today,
                quota: next.daily_quota,
            });
        }

        next.used_today += 1;
        if rolled {
            self.state.persist_sim(next.clone()).await?;
        } else {
            self.state.persist_sim_usage(id, next.used_today).await?;
        }
        *sim = next.clone();

        debug!(%id, used_today = next.used_today, daily_quota = next.daily_quota, "Usage recorded");
        Ok(next)
    }

    /// Zero the counter of every SIM whose last reset predates `today`
    ///
    /// Returns how many SIMs were reset. Takes each SIM's lock, so it
    /// serializes with `record_usage_on` for that SIM.
    pub async fn reset_daily(&self, today: NaiveDate) -> Result<usize> {
        debug!(%today, "SimRegistry::reset_daily: called");
        let slots: Vec<Arc<SimSlot>> = self.sims.read().await.values().cloned().collect();

        let mut reset = 0;
        for slot in slots {
            let mut sim = slot.sim.lock().await;
            let mut next = sim.clone();
            if next.roll_over(today) {
                self.state.persist_sim(next.clone()).await?;
                *sim = next;
                reset += 1;
            }
        }

        if reset > 0 {
            info!(reset, %today, "Daily quota reset");
        }
        Ok(reset)
    }

    /// Acquire the execution lease of a SIM
    ///
    /// Only one execution per SIM holds the lease at a time; it is released
    /// when the guard drops.
    pub async fn lease(&self, id: &str) -> Result<OwnedMutexGuard<()>> {
        debug!(%id, "SimRegistry::lease: called");
        let slot = self.slot(id).await?;
        Ok(slot.lease.clone().lock_owned().await)
    }

    /// Whether an execution currently holds the SIM's lease
    pub async fn is_leased(&self, id: &str) -> Result<bool> {
        let slot = self.slot(id).await?;
        Ok(slot.lease.try_lock().is_err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    async fn registry_with_sim(quota: u32, used: u32, last_reset: NaiveDate) -> (SimRegistry, Sim) {
        let device = Device::new("Device-01", 1);
        let mut sim = Sim::new(device.id.clone(), "+212600000001", Carrier::Iam, quota, last_reset);
        sim.used_today = used;

        let state = StateManager::spawn_memory();
        state.persist_device(device.clone()).await.unwrap();
        state.persist_sim(sim.clone()).await.unwrap();

        let registry = SimRegistry::from_records(RegistryConfig::default(), state, vec![device], vec![sim.clone()]);
        (registry, sim)
    }

    #[tokio::test]
    async fn test_register_device_provisions_sims() {
        let registry = SimRegistry::new(RegistryConfig::default(), StateManager::spawn_memory());
        let (device, sims) = registry.register_device("Pixel 7", None).await.unwrap();

        assert_eq!(device.sim_count, 2);
        assert_eq!(sims.len(), 2);
        for sim in &sims {
            assert_eq!(sim.device_id, device.id);
            assert_eq!(sim.daily_quota, 20);
            assert!(sim.phone_number.starts_with("+2126"));
            assert_eq!(sim.phone_number.len(), 13);
        }
        assert_eq!(registry.sims_for_device(&device.id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_register_device_rejects_blank_name() {
        let registry = SimRegistry::new(RegistryConfig::default(), StateManager::spawn_memory());
        assert!(matches!(
            registry.register_device("   ", None).await,
            Err(UssdError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_register_device_rejects_zero_quota() {
        let config = RegistryConfig {
            default_daily_quota: 0,
            ..Default::default()
        };
        let registry = SimRegistry::new(config, StateManager::spawn_memory());

        assert!(matches!(
            registry.register_device("Pixel 7", None).await,
            Err(UssdError::InvalidInput(_))
        ));
        assert!(registry.list_devices().await.is_empty());
        assert!(registry.list_sims().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_sim_rejects_zero_quota() {
        let (registry, sim) = registry_with_sim(20, 0, day(1)).await;
        assert!(matches!(
            registry
                .add_sim(&sim.device_id, "+212600000009", Carrier::Orange, Some(0))
                .await,
            Err(UssdError::InvalidInput(_))
        ));
        assert_eq!(registry.get_device(&sim.device_id).await.unwrap().sim_count, 1);
    }

    #[tokio::test]
    async fn test_register_device_starts_offline() {
        let registry = SimRegistry::new(RegistryConfig::default(), StateManager::spawn_memory());
        let (device, _) = registry.register_device("Pixel 7", None).await.unwrap();
        assert!(!device.is_online());
        assert!(device.last_seen.is_none());

        let touched = registry.touch_device(&device.id).await.unwrap();
        assert!(touched.is_online());
        assert!(registry.get_device(&device.id).await.unwrap().is_online());
    }

    #[tokio::test]
    async fn test_record_usage_increments_by_one() {
        let (registry, sim) = registry_with_sim(20, 4, day(1)).await;
        let updated = registry.record_usage_on(&sim.id, day(1)).await.unwrap();
        assert_eq!(updated.used_today, 5);
        assert_eq!(registry.get_sim(&sim.id).await.unwrap().used_today, 5);
    }

    #[tokio::test]
    async fn test_record_usage_at_quota_fails_without_change() {
        let (registry, sim) = registry_with_sim(20, 20, day(1)).await;
        let err = registry.record_usage_on(&sim.id, day(1)).await.unwrap_err();
        assert!(matches!(err, UssdError::QuotaExceeded { used: 20, quota: 20, .. }));
        assert_eq!(registry.get_sim(&sim.id).await.unwrap().used_today, 20);
    }

    #[tokio::test]
    async fn test_record_usage_rolls_over_on_new_day() {
        let (registry, sim) = registry_with_sim(20, 20, day(1)).await;
        let updated = registry.record_usage_on(&sim.id, day(2)).await.unwrap();
        assert_eq!(updated.used_today, 1);
        assert_eq!(updated.last_reset_date, day(2));
    }

    #[tokio::test]
    async fn test_record_usage_unknown_sim() {
        let (registry, _) = registry_with_sim(20, 0, day(1)).await;
        assert!(matches!(
            registry.record_usage_on("sim-nope", day(1)).await,
            Err(UssdError::NotFound { kind: "SIM", .. })
        ));
    }

    #[tokio::test]
    async fn test_reset_daily_only_when_date_advances() {
        let (registry, sim) = registry_with_sim(20, 12, day(3)).await;

        assert_eq!(registry.reset_daily(day(3)).await.unwrap(), 0);
        assert_eq!(registry.reset_daily(day(2)).await.unwrap(), 0);
        assert_eq!(registry.get_sim(&sim.id).await.unwrap().used_today, 12);

        assert_eq!(registry.reset_daily(day(4)).await.unwrap(), 1);
        let after = registry.get_sim(&sim.id).await.unwrap();
        assert_eq!(after.used_today, 0);
        assert_eq!(after.last_reset_date, day(4));
    }

    #[tokio::test]
    async fn test_refresh_sim_rolls_over() {
        let (registry, sim) = registry_with_sim(20, 20, day(1)).await;
        assert_eq!(registry.refresh_sim(&sim.id, day(1)).await.unwrap().used_today, 20);
        assert_eq!(registry.refresh_sim(&sim.id, day(2)).await.unwrap().used_today, 0);
        assert_eq!(registry.get_sim(&sim.id).await.unwrap().last_reset_date, day(2));
    }

    #[tokio::test]
    async fn test_same_day_reset_keeps_increment() {
        let (registry, sim) = registry_with_sim(20, 0, day(5)).await;
        registry.record_usage_on(&sim.id, day(5)).await.unwrap();
        registry.reset_daily(day(5)).await.unwrap();
        assert_eq!(registry.get_sim(&sim.id).await.unwrap().used_today, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reset_interleaved_with_usage_loses_nothing() {
        for _ in 0..20 {
            let (registry, sim) = registry_with_sim(20, 10, day(1)).await;
            let registry = Arc::new(registry);

            let usage: Vec<_> = (0..5)
                .map(|_| {
                    let registry = registry.clone();
                    let id = sim.id.clone();
                    tokio::spawn(async move { registry.record_usage_on(&id, day(1)).await })
                })
                .collect();
            let reset = {
                let registry = registry.clone();
                tokio::spawn(async move { registry.reset_daily(day(2)).await })
            };

            // Increments applied before the reset are wiped; the rest count toward the new day
            let mut after_reset = 0;
            for handle in usage {
                let updated = handle.await.unwrap().unwrap();
                if updated.last_reset_date == day(2) {
                    after_reset += 1;
                }
            }
            assert_eq!(reset.await.unwrap().unwrap(), 1);

            let final_sim = registry.get_sim(&sim.id).await.unwrap();
            assert_eq!(final_sim.last_reset_date, day(2));
            assert_eq!(final_sim.used_today, after_reset);

            let snapshot = registry.state.load().await.unwrap();
            let stored = snapshot.sims.iter().find(|s| s.id == sim.id).unwrap();
            assert_eq!(stored.used_today, final_sim.used_today);
            assert_eq!(stored.last_reset_date, day(2));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_usage_never_exceeds_quota() {
        let (registry, sim) = registry_with_sim(20, 0, day(1)).await;
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let registry = registry.clone();
                let id = sim.id.clone();
                tokio::spawn(async move { registry.record_usage_on(&id, day(1)).await })
            })
            .collect();

        let mut succeeded = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(UssdError::QuotaExceeded { .. }) => rejected += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(succeeded, 20);
        assert_eq!(rejected, 30);
        assert_eq!(registry.get_sim(&sim.id).await.unwrap().used_today, 20);
    }

    #[tokio::test]
    async fn test_lease_is_exclusive() {
        let (registry, sim) = registry_with_sim(20, 0, day(1)).await;
        assert!(!registry.is_leased(&sim.id).await.unwrap());

        let guard = registry.lease(&sim.id).await.unwrap();
        assert!(registry.is_leased(&sim.id).await.unwrap());

        drop(guard);
        assert!(!registry.is_leased(&sim.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_touch_device_marks_online() {
        let (registry, sim) = registry_with_sim(20, 0, day(1)).await;
        let touched = registry.touch_device(&sim.device_id).await.unwrap();
        assert!(touched.is_online());
        assert!(touched.last_seen.is_some());
        assert!(registry.touch_device("dev-missing").await.is_err());
    }

    #[tokio::test]
    async fn test_add_sim_bumps_device_count() {
        let (registry, sim) = registry_with_sim(20, 0, day(1)).await;
        let added = registry
            .add_sim(&sim.device_id, "+212600000009", Carrier::Orange, Some(5))
            .await
            .unwrap();
        assert_eq!(added.daily_quota, 5);
        assert_eq!(registry.get_device(&sim.device_id).await.unwrap().sim_count, 2);
    }
}
