use crate::prelude::*;

use crate::eversolar::client::Pmu;
use crate::eversolar::reading::{DeviceMode, Reading};
use chrono::{DateTime, NaiveDate, Utc};

/// Drives the periodic poll loop and the host-side state derived from it:
/// daily time sync, AC online/offline transitions, the fully-down flag.
///
/// One tick runs to completion (success or failure) before the next is
/// considered; a failed poll is retried at the next scheduled tick, never
/// sooner.
pub struct Coordinator {
    config: Arc<Config>,
    pmu: Pmu,

    was_connected: bool,
    synced_today: bool,
    last_sync_date: Option<NaiveDate>,
    last_mode: Option<u16>,
    ac_online_time: Option<DateTime<Utc>>,
    ac_offline_time: Option<DateTime<Utc>>,
}

impl Coordinator {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            pmu: Pmu::new(config.pmu().clone()),
            config,
            was_connected: false,
            synced_today: false,
            last_sync_date: None,
            last_mode: None,
            ac_online_time: None,
            ac_offline_time: None,
        }
    }

    pub async fn start(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.pmu().scan_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            "monitoring {}:{} every {}s",
            self.config.pmu().host(),
            self.config.pmu().port(),
            self.config.pmu().scan_interval().as_secs()
        );

        loop {
            tokio::select! {
                _ = interval.tick() => self.update().await,
                _ = shutdown_rx.recv() => {
                    info!("coordinator stopping");
                    return Ok(());
                }
            }
        }
    }

    async fn update(&mut self) {
        match self.pmu.poll().await {
            Ok(reading) => self.handle_reading(reading).await,
            Err(e) => {
                self.was_connected = false;
                error!("{}: {}", self.config.pmu().host(), e);
            }
        }
    }

    async fn handle_reading(&mut self, reading: Reading) {
        let today = chrono::Local::now().date_naive();
        if self.last_sync_date != Some(today) {
            self.synced_today = false;
            self.last_sync_date = Some(today);
        }

        // sync the device clock on the first good poll of the day, and
        // again after an outage
        let reconnected = !self.was_connected;
        self.was_connected = true;
        if self.config.pmu().auto_time_sync() && (!self.synced_today || reconnected) {
            match self.pmu.sync_time().await {
                Ok(()) => {
                    self.synced_today = true;
                    info!(
                        "device time synced (delta was {}s)",
                        reading
                            .time_delta_s
                            .map_or_else(|| "?".to_string(), |delta| delta.to_string())
                    );
                }
                Err(e) => warn!("time sync failed: {}", e),
            }
        }

        self.track_transitions(&reading);

        info!(
            "{}: power={:?}W vac={:?}V fac={:?}Hz e_today={:?}kWh mode={:?}",
            reading.inverter_id,
            reading.power_w,
            reading.vac_v,
            reading.fac_hz,
            reading.e_today_kwh,
            reading.device_mode()
        );

        if self.is_fully_down(&reading) {
            info!("{}: fully down (wait mode, PV dark)", reading.inverter_id);
        }
    }

    fn track_transitions(&mut self, reading: &Reading) {
        let current = reading.device_mode();
        let last = self
            .last_mode
            .and_then(|mode| DeviceMode::try_from(mode).ok());

        match (last, current) {
            (Some(DeviceMode::Wait), Some(DeviceMode::Normal)) => {
                let at = Utils::utc();
                self.ac_online_time = Some(at);
                info!("AC came online at {}", at);
            }
            (Some(DeviceMode::Normal), Some(DeviceMode::Wait)) => {
                let at = Utils::utc();
                self.ac_offline_time = Some(at);
                info!("AC went offline at {}", at);
            }
            _ => {}
        }

        if reading.mode.is_some() {
            self.last_mode = reading.mode;
        }
    }

    /// Wait mode with PV voltage under the threshold: the panels are dark
    /// and the inverter has shut down for the night.
    fn is_fully_down(&self, reading: &Reading) -> bool {
        reading.device_mode() == Some(DeviceMode::Wait)
            && reading.pv_v.unwrap_or(0.0) < self.config.pmu().pv_voltage_threshold()
    }

    pub fn ac_online_time(&self) -> Option<DateTime<Utc>> {
        self.ac_online_time
    }

    pub fn ac_offline_time(&self) -> Option<DateTime<Utc>> {
        self.ac_offline_time
    }
}
