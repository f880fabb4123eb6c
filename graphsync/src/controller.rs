use crate::catalog::Catalog;
use crate::config::SyncConfig;
use crate::errors::{Result, SyncError};
use crate::fetch::RemoteSource;
use crate::graph::{GraphStore, TimeSeriesStore};
use crate::mapper::EntityMapper;
use crate::models::{LoopStatus, SyncStats};
use crate::scheduler::{LoopSettings, SchedulerLoop};
use crate::sync::{
    DeviceTelemetryStream, MappingRefresh, MetricFeed, MetricStream, StreamSynchronizer,
    TicketStream, MAPPING_STREAM,
};
use crate::upsert::Upserter;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    Initialized,
    Running,
    Stopped,
}

/// Top-level lifecycle: a cold pass over every stream, then one scheduler
/// loop per enabled stream until stopped.
pub struct SyncRunController {
    mapper: Arc<EntityMapper>,
    loops: Vec<SchedulerLoop>,
    state: Mutex<ControllerState>,
}

impl SyncRunController {
    /// Wires the default streams against the given stores and remote source.
    /// Streams whose schedule interval is zero get no loop.
    pub fn new(
        config: SyncConfig,
        catalog: Arc<Catalog>,
        graph: Arc<dyn GraphStore>,
        series: Arc<dyn TimeSeriesStore>,
        source: Arc<dyn RemoteSource>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let mapper = Arc::new(EntityMapper::new(
            Arc::clone(&graph),
            config.hierarchy.clone(),
        ));
        let upserter = Arc::new(Upserter::new(
            Arc::clone(&graph),
            series,
            config.timeseries_max_days,
        ));

        let mapping: Arc<dyn StreamSynchronizer> = Arc::new(MappingRefresh::new(Arc::clone(&mapper)));
        let tickets: Arc<dyn StreamSynchronizer> = Arc::new(TicketStream::new(
            Arc::clone(&source),
            Arc::clone(&graph),
            Arc::clone(&mapper),
            Arc::clone(&upserter),
            Arc::clone(&config),
        ));
        let telemetry: Arc<dyn StreamSynchronizer> = Arc::new(DeviceTelemetryStream::new(
            Arc::clone(&source),
            Arc::clone(&graph),
            Arc::clone(&upserter),
            config.network_context.clone(),
        ));
        let performance: Arc<dyn StreamSynchronizer> = Arc::new(MetricStream::new(
            MetricFeed::Performance,
            Arc::clone(&source),
            Arc::clone(&mapper),
            Arc::clone(&upserter),
            config.performance_lookback(),
        ));
        let status: Arc<dyn StreamSynchronizer> = Arc::new(MetricStream::new(
            MetricFeed::Status,
            source,
            Arc::clone(&mapper),
            upserter,
            config.performance_lookback(),
        ));

        let schedules = &config.schedules;
        let streams = vec![
            (mapping, LoopSettings::new(&schedules.mapping_refresh, &config)),
            (tickets, LoopSettings::new(&schedules.tickets, &config)),
            (telemetry, LoopSettings::new(&schedules.telemetry, &config)),
            (performance, LoopSettings::new(&schedules.performance, &config)),
            (status, LoopSettings::new(&schedules.status, &config)),
        ];

        let streams = streams
            .into_iter()
            .filter(|(stream, settings)| {
                let enabled = !settings.interval.is_zero();
                if !enabled {
                    log::info!("Stream '{}' disabled by configuration.", stream.name());
                }
                enabled
            })
            .collect();
        Ok(Self::from_streams(mapper, catalog, streams))
    }

    /// Builds a controller over an explicit set of streams.
    pub fn from_streams(
        mapper: Arc<EntityMapper>,
        catalog: Arc<Catalog>,
        streams: Vec<(Arc<dyn StreamSynchronizer>, LoopSettings)>,
    ) -> Self {
        let loops = streams
            .into_iter()
            .map(|(stream, settings)| SchedulerLoop::new(stream, Arc::clone(&catalog), settings))
            .collect();
        Self {
            mapper,
            loops,
            state: Mutex::new(ControllerState::Idle),
        }
    }

    fn check_move(
        state: ControllerState,
        allowed: &[ControllerState],
        next: ControllerState,
    ) -> Result<()> {
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(SyncError::InvalidState(format!(
                "cannot move controller from {:?} to {:?}",
                state, next
            )))
        }
    }

    fn transition(&self, allowed: &[ControllerState], next: ControllerState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Self::check_move(*state, allowed, next)?;
        *state = next;
        Ok(())
    }

    /// Cold pass: build the entity mapping, then run one cycle of every stream.
    ///
    /// Fails only when the mapping cannot be built, in which case the
    /// controller stays `Idle` and `init` may be called again. A failing
    /// stream is logged and left out of the returned stats; its cursor stays
    /// where it was.
    pub async fn init(&self) -> Result<BTreeMap<String, SyncStats>> {
        Self::check_move(
            self.state(),
            &[ControllerState::Idle],
            ControllerState::Initialized,
        )?;
        let mapping = self.mapper.build().await?;
        self.transition(&[ControllerState::Idle], ControllerState::Initialized)?;

        let mut report = BTreeMap::new();
        report.insert(
            MAPPING_STREAM.to_string(),
            SyncStats {
                processed: mapping.len(),
                ..SyncStats::default()
            },
        );
        // The mapping was just built; its loop is not run again here.
        for scheduler in self.loops.iter().filter(|s| s.name() != MAPPING_STREAM) {
            match scheduler.run_once().await {
                Ok(stats) => {
                    report.insert(scheduler.name().to_string(), stats);
                }
                Err(err) => {
                    log::error!("Initial sync of '{}' failed: {}", scheduler.name(), err);
                }
            }
        }
        Ok(report)
    }

    /// Launches every scheduler loop. Allowed once, before `stop`.
    ///
    /// When the mapping is not built yet, the mapping loop runs right away
    /// instead of waiting for its initial delay.
    pub fn start(&self) -> Result<()> {
        self.transition(
            &[ControllerState::Idle, ControllerState::Initialized],
            ControllerState::Running,
        )?;
        let mapping_pending = !self.mapper.is_built();
        for scheduler in &self.loops {
            if mapping_pending && scheduler.name() == MAPPING_STREAM {
                log::warn!("Entity mapping not built, refreshing it now.");
                scheduler.start_after(Duration::ZERO)?;
            } else {
                scheduler.start()?;
            }
        }
        log::info!("Started {} sync loop(s).", self.loops.len());
        Ok(())
    }

    /// Cancels every loop. Cycles already in flight still finish.
    pub fn stop(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ControllerState::Stopped;
        for scheduler in &self.loops {
            scheduler.stop();
        }
    }

    pub async fn join(&self) {
        for scheduler in &self.loops {
            scheduler.join().await;
        }
    }

    pub fn state(&self) -> ControllerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn statuses(&self) -> Vec<LoopStatus> {
        self.loops.iter().map(SchedulerLoop::status).collect()
    }

    pub fn mapper(&self) -> &Arc<EntityMapper> {
        &self.mapper
    }
}
