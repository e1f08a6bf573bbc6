//! The control loop that connects the scheduler to real devices.

use crate::components::record::SensorSnapshot;
use crate::config::DispenserConfig;
use crate::error::ConfigError;
use crate::events::{DoseEvent, Request, SystemEvent, TickOutput};
use crate::ports::{Actuator, Devices, Notifier, SensorPort, Verdict, Verifier};
use crate::scheduler::DoseScheduler;
use crate::time::Clock;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Upper bound on scheduler re-ticks inside one control cycle.
const MAX_ROUNDS_PER_CYCLE: usize = 64;

/// The main Dosekeeper engine.
///
/// The engine owns the [`DoseScheduler`], a [`Clock`] and one set of
/// [`Devices`]. Each control cycle it ticks the scheduler and serves the
/// returned requests strictly one after another, so the verifier and the
/// dispensing disk are never used by two doses at once.
pub struct DispenserEngine<C, V, A, S, N> {
    scheduler: DoseScheduler,
    clock: C,
    devices: Devices<V, A, S, N>,
    tick_interval: Duration,
    verification_timeout: Duration,
    sensor_timeout: Duration,
    cycle: u64,
    system_event_sender: broadcast::Sender<SystemEvent>,
    dose_event_sender: broadcast::Sender<DoseEvent>,
}

// Core implementation block for internal logic.
impl<C, V, A, S, N> DispenserEngine<C, V, A, S, N>
where
    C: Clock,
    V: Verifier,
    A: Actuator,
    S: SensorPort,
    N: Notifier,
{
    /// Creates a new engine from a validated configuration.
    pub fn new(
        config: &DispenserConfig,
        clock: C,
        devices: Devices<V, A, S, N>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let scheduler = DoseScheduler::new(config.dose_slots()?, config.scheduler_options()?);
        let (system_event_sender, _) = broadcast::channel(64);
        let (dose_event_sender, _) = broadcast::channel(256);
        Ok(Self {
            scheduler,
            clock,
            devices,
            tick_interval: config.tick_interval(),
            verification_timeout: config.verification_timeout(),
            sensor_timeout: config.sensor_timeout(),
            cycle: 0,
            system_event_sender,
            dose_event_sender,
        })
    }

    /// Runs control cycles on a fixed interval until Ctrl+C is received.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!("DispenserEngine starting up...");
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.system_event_sender
            .send(SystemEvent::EngineStarted {
                timestamp: tokio::time::Instant::now(),
            })
            .ok();
        info!(
            "Engine running every {:?}. Press Ctrl+C to shut down.",
            self.tick_interval
        );

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                signal = &mut shutdown => {
                    signal?;
                    info!("Shutdown signal received.");
                    break;
                }
                _ = interval.tick() => {
                    self.step().await;
                }
            }
        }

        self.system_event_sender
            .send(SystemEvent::EngineShutdown)
            .ok();
        info!("DispenserEngine has shut down.");
        Ok(())
    }

    /// Runs one control cycle and returns everything the scheduler produced.
    ///
    /// Requests are served in the order they were issued. After a dose's
    /// sequence finishes the scheduler is ticked again, so a second dose
    /// that became due in the same tick is served in the same cycle.
    pub async fn step(&mut self) -> TickOutput {
        self.cycle += 1;
        let mut cycle_output = TickOutput::default();
        let mut served = 0;
        let started_at = self.clock.now();

        for round in 0..MAX_ROUNDS_PER_CYCLE {
            let now = self.clock.now();
            trace!("Cycle #{} round {} at {}.", self.cycle, round, now);
            let output = self.scheduler.tick(now);
            if output.requests.is_empty() {
                self.publish(&output);
                cycle_output.merge(output);
                break;
            }
            let mut queue = self.absorb(output, &mut cycle_output);
            while let Some(request) = queue.pop_front() {
                served += 1;
                if let Some(follow_up) = self.serve(request).await {
                    queue.extend(self.absorb(follow_up, &mut cycle_output));
                }
            }
        }

        self.system_event_sender
            .send(SystemEvent::CycleCompleted {
                cycle: self.cycle,
                at: started_at,
                requests_served: served,
            })
            .ok();
        cycle_output
    }

    /// Executes one request against its device and feeds the result back.
    ///
    /// Returns the scheduler's follow-up output, or `None` when the request
    /// produced nothing further (notifications) or was rejected.
    async fn serve(&mut self, request: Request) -> Option<TickOutput> {
        debug!("Serving {:?}", request);
        let result = match request {
            Request::Verify(dose) => {
                match timeout(
                    self.verification_timeout,
                    self.devices.verifier.verify(&dose),
                )
                .await
                {
                    Ok(Ok(verdict)) => self
                        .scheduler
                        .record_verification_result(&dose, verdict == Verdict::Allow),
                    Ok(Err(e)) => {
                        warn!("Verification device failed for {}: {}", dose, e);
                        self.scheduler.record_verification_result(&dose, false)
                    }
                    Err(_) => {
                        warn!(
                            "Verification for {} timed out after {:?}.",
                            dose, self.verification_timeout
                        );
                        self.scheduler.abandon_verification(&dose)
                    }
                }
            }
            Request::Dispense(dose) => {
                // Once the disk is moving there is no way to cancel it.
                let result = self.devices.actuator.dispense(&dose).await;
                self.scheduler.record_dispense_result(&dose, result)
            }
            Request::Sample(dose) => {
                let snapshot = match timeout(self.sensor_timeout, self.devices.sensors.sample())
                    .await
                {
                    Ok(Ok(reading)) => match SensorSnapshot::try_from(reading) {
                        Ok(snapshot) => Some(snapshot),
                        Err(e) => {
                            warn!("Discarding sensor reading for {}: {}", dose, e);
                            None
                        }
                    },
                    Ok(Err(e)) => {
                        warn!("Sensors unavailable for {}: {}", dose, e);
                        None
                    }
                    Err(_) => {
                        warn!("Sensor read for {} timed out.", dose);
                        None
                    }
                };
                self.scheduler.record_sensor_snapshot(&dose, snapshot)
            }
            Request::Notify {
                dose,
                message,
                severity,
            } => {
                if let Err(e) = self.devices.notifier.send(&message, severity).await {
                    warn!("Failed to deliver {} notification for {}: {}", severity, dose, e);
                    self.dose_event_sender
                        .send(DoseEvent::NotificationFailed {
                            dose,
                            severity,
                            error: e.to_string(),
                        })
                        .ok();
                }
                return None;
            }
        };

        match result {
            Ok(output) => Some(output),
            Err(e) => {
                error!("Scheduler rejected a device result: {}", e);
                self.dose_event_sender.send(DoseEvent::DriverError(e)).ok();
                None
            }
        }
    }

    /// Publishes `output`, folds it into the cycle total and hands back its
    /// requests in order.
    fn absorb(
        &self,
        output: TickOutput,
        cycle_output: &mut TickOutput,
    ) -> std::collections::VecDeque<Request> {
        self.publish(&output);
        let queue = output.requests.iter().cloned().collect();
        cycle_output.merge(output);
        queue
    }

    fn publish(&self, output: &TickOutput) {
        for transition in &output.transitions {
            self.dose_event_sender
                .send(DoseEvent::StateChanged(transition.clone()))
                .ok();
        }
        for outcome in &output.outcomes {
            info!("Dose outcome: {:?}", outcome);
            self.dose_event_sender
                .send(DoseEvent::Finished(outcome.clone()))
                .ok();
        }
    }
}

// Public API implementation block.
impl<C, V, A, S, N> DispenserEngine<C, V, A, S, N> {
    /// Read access to the scheduler, e.g. to inspect dose records.
    pub fn scheduler(&self) -> &DoseScheduler {
        &self.scheduler
    }

    /// Number of control cycles run so far.
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Subscribes to the `SystemEvent` stream.
    pub fn subscribe_system_events(&self) -> broadcast::Receiver<SystemEvent> {
        self.system_event_sender.subscribe()
    }

    /// Subscribes to the `DoseEvent` stream.
    pub fn subscribe_dose_events(&self) -> broadcast::Receiver<DoseEvent> {
        self.dose_event_sender.subscribe()
    }
}
