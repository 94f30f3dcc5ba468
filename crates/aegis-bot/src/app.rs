//! Application wiring and the long-running loops.
//!
//! Builds the whole object graph from the config, spawns the out-of-band
//! workers, and drives the cycle loop. Only the watchdog, the reaper, and
//! the FATAL path may terminate the process; everything else degrades
//! through the state machine.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use aegis_brains::DecisionCore;
use aegis_feed::KlineClient;
use aegis_gatekeeper::{Gatekeeper, GatekeeperConfig, NullSink, SignalSink};
use aegis_persistence::{BlockLevel, DecisionRecord, SignalLogWriter, SqliteStore};
use aegis_registry::{ModuleRegistry, SystemGuardian};
use aegis_risk::RiskCore;
use aegis_runtime::{
    ExitCode, FatalReaper, HeartbeatClock, ProcessExiter, RunState, ServiceNotifier,
    StateMachineConfig, SystemStateMachine, ThreadWatchdog, WatchdogConfig,
};
use aegis_signal::{GeneratorConfig, SignalGenerator};
use aegis_state::SystemStateHandle;
use aegis_telegram::{CommandContext, CommandHandler, TelegramClient};
use aegis_telemetry::Metrics;

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::modules::register_standard_modules;

fn loop_stall_injected() -> bool {
    std::env::var("FAULT_INJECT_LOOP_STALL")
        .map(|v| {
            let v = v.trim();
            !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
        })
        .unwrap_or(false)
}

/// The wired application.
pub struct Application {
    config: AppConfig,
    state: SystemStateHandle,
    machine: Arc<SystemStateMachine>,
    guardian: Arc<SystemGuardian>,
    store: Arc<SqliteStore>,
    gatekeeper: Arc<Gatekeeper>,
    decision_core: Arc<DecisionCore>,
    generator: SignalGenerator,
    sink: Arc<dyn SignalSink>,
    telegram: Option<TelegramClient>,
    metrics: Metrics,
    clock: HeartbeatClock,
    notifier: ServiceNotifier,
    /// Transitions already persisted to the trace.
    persisted_transitions: u64,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let state = SystemStateHandle::new();
        let machine = Arc::new(SystemStateMachine::new(StateMachineConfig {
            safe_mode_ttl: Duration::from_secs(config.safety.safe_mode_ttl_secs),
            ..Default::default()
        }));

        let registry = Arc::new(ModuleRegistry::new());
        register_standard_modules(&registry, machine.clone());

        let guardian = Arc::new(SystemGuardian::new(
            registry,
            machine.clone(),
            state.clone(),
        ));

        let store = Arc::new(SqliteStore::open(&config.persistence.db_path)?);

        // Outbound sink: Telegram when configured and the token is
        // present, otherwise the recording null sink.
        let telegram = match (&config.telegram, std::env::var("AEGIS_TELEGRAM_TOKEN").ok()) {
            (Some(tg_config), Some(token)) if !token.is_empty() => {
                Some(TelegramClient::new(token, tg_config.clone())?)
            }
            (Some(_), _) => {
                warn!("telegram configured but AEGIS_TELEGRAM_TOKEN not set, using null sink");
                None
            }
            (None, _) => None,
        };
        let sink: Arc<dyn SignalSink> = match &telegram {
            Some(client) => Arc::new(client.clone()),
            None => Arc::new(NullSink::new()),
        };

        let decision_core = Arc::new(DecisionCore::new(config.decision.clone()));

        let gatekeeper = Arc::new(Gatekeeper::new(
            guardian.clone(),
            RiskCore::new(config.risk.clone()),
            decision_core.clone(),
            aegis_brains::PositionSizer::new(config.sizer),
            store.clone(),
            SignalLogWriter::new(&config.persistence.signal_log_path),
            sink.clone(),
            state.clone(),
            GatekeeperConfig {
                initial_balance_usd: config.engine.initial_balance_usd,
                risk_percent: config.engine.risk_percent,
            },
        ));

        let client = KlineClient::new(config.feed.clone())?;
        let generator = SignalGenerator::new(
            client,
            GeneratorConfig {
                symbols: config.engine.symbols.clone(),
                initial_balance_usd: config.engine.initial_balance_usd,
                risk_percent: config.engine.risk_percent,
                min_position_usd: config.engine.min_position_usd,
                max_position_usd: config.engine.max_position_usd,
                trading_window: config.engine.trading_window,
                checkpoint_every: config.engine.checkpoint_every,
                ..Default::default()
            },
            decision_core.clone(),
            gatekeeper.clone(),
            sink.clone(),
            store.clone(),
            state.clone(),
        );

        let metrics = Metrics::new()?;

        Ok(Self {
            config,
            state,
            machine,
            guardian,
            store,
            gatekeeper,
            decision_core,
            generator,
            sink,
            telegram,
            metrics,
            clock: HeartbeatClock::new(),
            notifier: ServiceNotifier::from_env(),
            persisted_transitions: 0,
        })
    }

    /// Run until shutdown. Returns the exit code the process should use.
    pub async fn run(mut self) -> AppResult<ExitCode> {
        info!("starting aegis engine");

        // Restore the durable state subset.
        match self.store.latest_checkpoint() {
            Ok(Some(checkpoint)) => {
                self.state.restore_checkpoint(checkpoint);
                info!("state restored from checkpoint");
            }
            Ok(None) => info!("no checkpoint found, starting fresh"),
            Err(e) => warn!(?e, "checkpoint restore failed, starting fresh"),
        }
        // The restored health flags may predate this process; the state
        // machine is the only source of truth for the derived flags.
        self.state.set_running(true);
        self.machine.sync_to_system_state(&self.state);

        // The synchronous gate adapter posts onto this runtime.
        self.guardian
            .install_runtime_handle(tokio::runtime::Handle::current());

        // Out-of-band workers. Neither is cancelled by the main loop.
        let exiter = Arc::new(ProcessExiter);
        let heartbeat = Duration::from_secs(self.config.safety.heartbeat_interval_secs);
        let watchdog = ThreadWatchdog::new(
            self.machine.clone(),
            self.clock.clone(),
            WatchdogConfig {
                check_interval: Duration::from_secs(5),
                stall_threshold: heartbeat * 3,
            },
            exiter.clone(),
        )
        .spawn();
        let reaper = FatalReaper::new(self.machine.clone(), exiter).spawn();

        // FSM event pump.
        let pump = self.spawn_event_pump();

        // Background loops on the scheduler.
        let heartbeat_task = self.spawn_heartbeat_loop(heartbeat);
        let report_task = self.spawn_daily_report_loop();
        let command_task = self.spawn_command_handler();

        self.notifier.notify_ready().ok();
        if let Err(e) = self.sink.send_message("Aegis engine started").await {
            warn!(?e, "failed to send startup notice");
        }

        let exit_code = self.cycle_loop().await;

        // Shutdown: no transitions past this point.
        self.machine.mark_shutdown_started();
        self.notifier.notify_stopping().ok();
        self.state.set_running(false);

        heartbeat_task.abort();
        report_task.abort();
        if let Some(task) = command_task {
            task.abort();
        }
        pump.abort();
        watchdog.stop();
        reaper.stop();

        if let Err(e) = self.sink.send_message("Aegis engine stopped").await {
            warn!(?e, "failed to send shutdown notice");
        }

        info!(code = exit_code.code(), "aegis engine stopped");
        Ok(exit_code)
    }

    /// The main cycle loop. Exits on ctrl-c (graceful) or FATAL
    /// (critical; normally the reaper wins the race).
    async fn cycle_loop(&mut self) -> ExitCode {
        let interval = Duration::from_secs(self.config.engine.interval_secs);
        let mut stalled_once = false;

        loop {
            if self.machine.is_fatal() {
                return ExitCode::Critical;
            }

            // Deterministic stall for runtime tests: stop beating and let
            // the watchdog observe it.
            if loop_stall_injected() && !stalled_once {
                stalled_once = true;
                error!("FAULT_INJECT_LOOP_STALL active, stalling the cycle loop");
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }

            self.clock.beat();
            self.machine.update_heartbeat();
            self.state.update_heartbeat();

            let cycle_started = Utc::now();
            match self.generator.run_cycle().await {
                Ok(stats) => {
                    self.metrics.cycles_total.inc();
                    self.metrics
                        .signals_emitted_total
                        .inc_by(u64::from(stats.signals_sent));
                    self.metrics
                        .signals_blocked_total
                        .with_label_values(&["chain"])
                        .inc_by(u64::from(stats.signals_blocked));
                    if stats.errors == 0 {
                        self.state.reset_errors();
                        self.machine.reset_errors();
                        self.machine.record_recovery_cycle(true);
                    } else {
                        self.record_cycle_error(&format!(
                            "{} symbol passes failed",
                            stats.errors
                        ));
                    }
                }
                Err(e) => {
                    self.metrics.cycle_errors_total.inc();
                    self.record_cycle_error(&e.to_string());
                }
            }

            self.metrics
                .consecutive_errors
                .set(i64::from(self.state.system_health().consecutive_errors));
            self.metrics
                .open_positions
                .set(self.state.open_positions().len() as i64);

            self.machine.check_safe_mode_ttl();
            self.machine.sync_to_system_state(&self.state);
            self.persist_new_transitions();
            self.notify_significant_transitions().await;

            let elapsed = (Utc::now() - cycle_started)
                .to_std()
                .unwrap_or(Duration::ZERO);
            let pause = interval.saturating_sub(elapsed);

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => {
                            info!("shutdown requested");
                            return ExitCode::Success;
                        }
                        Err(e) => {
                            error!(?e, "signal handler failed");
                            return ExitCode::Recoverable;
                        }
                    }
                }
            }
        }
    }

    fn record_cycle_error(&self, message: &str) {
        warn!(message, "cycle ended with errors");
        self.state.record_error(message);
        self.machine.record_error(message);
        self.machine.record_recovery_cycle(false);
        self.machine.sync_to_system_state(&self.state);
    }

    /// Persist FSM transitions the observer can read out-of-process.
    fn persist_new_transitions(&mut self) {
        let info = self.machine.state_info();
        if info.transitions_count <= self.persisted_transitions {
            return;
        }
        let new = (info.transitions_count - self.persisted_transitions) as usize;
        let transitions = self.machine.recent_transitions(new);
        for t in &transitions {
            self.metrics
                .fsm_transitions_total
                .with_label_values(&[t.to.as_str()])
                .inc();
            let record = DecisionRecord::new(
                "SYSTEM",
                "SystemStateMachine",
                !matches!(t.to, RunState::SafeMode | RunState::Fatal),
                BlockLevel::None,
                format!("{} -> {}: {}", t.from, t.to, t.reason),
                json!({
                    "incident_id": t.incident_id,
                    "owner": t.owner,
                    "from": t.from.as_str(),
                    "to": t.to.as_str(),
                }),
            );
            if let Err(e) = self.store.log_decision(&record) {
                warn!(?e, "failed to persist FSM transition");
            }
        }
        self.persisted_transitions = info.transitions_count;
    }

    /// Notify the operator about significant state changes.
    async fn notify_significant_transitions(&self) {
        let Some(last) = self.machine.recent_transitions(1).pop() else {
            return;
        };
        // Only announce entries into degraded/safe states and recoveries,
        // and only once per transition (tracked by the persist counter
        // running right before this call).
        if last.timestamp < Utc::now() - chrono::Duration::seconds(self.config.engine.interval_secs as i64)
        {
            return;
        }
        let significant = matches!(
            last.to,
            RunState::SafeMode | RunState::Degraded | RunState::Fatal
        ) || last.to == RunState::Running && last.from == RunState::Recovering;
        if significant {
            let note = format!("State change: {} -> {} ({})", last.from, last.to, last.reason);
            if let Err(e) = self.sink.send_message(&note).await {
                warn!(?e, "failed to send transition notice");
            }
        }
    }

    fn spawn_event_pump(&self) -> JoinHandle<()> {
        let machine = self.machine.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            match machine.take_event_receiver() {
                Some(rx) => machine.run_event_pump(rx, state).await,
                None => error!("event receiver already taken, pump not started"),
            }
        })
    }

    fn spawn_heartbeat_loop(&self, interval: Duration) -> JoinHandle<()> {
        let state = self.state.clone();
        let notifier = ServiceNotifier::from_env();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                state.update_heartbeat();
                notifier.notify_watchdog().ok();
            }
        })
    }

    fn spawn_daily_report_loop(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let sink = self.sink.clone();
        tokio::spawn(async move {
            loop {
                // Sleep until the next 00:00 UTC.
                let now = Utc::now();
                let next = (now + chrono::Duration::days(1))
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .map(|t| t.and_utc())
                    .unwrap_or(now + chrono::Duration::days(1));
                let wait = (next - now).to_std().unwrap_or(Duration::from_secs(86400));
                tokio::time::sleep(wait).await;

                let report = match store.trade_stats(1) {
                    Ok(stats) => format!(
                        "Daily report: {} trades, {} wins / {} losses, win rate {:.1}%, \
                         PnL {:.2} USDT",
                        stats.total_trades,
                        stats.winning_trades,
                        stats.losing_trades,
                        stats.win_rate_pct,
                        stats.total_pnl
                    ),
                    Err(e) => format!("Daily report unavailable: {e}"),
                };
                if let Err(e) = sink.send_message(&report).await {
                    warn!(?e, "failed to send daily report");
                }
            }
        })
    }

    fn spawn_command_handler(&self) -> Option<JoinHandle<()>> {
        let client = self.telegram.clone()?;
        let ctx = CommandContext {
            state: self.state.clone(),
            machine: self.machine.clone(),
            store: self.store.clone(),
            gatekeeper: self.gatekeeper.clone(),
            decision_core: self.decision_core.clone(),
            initial_balance_usd: self.config.engine.initial_balance_usd,
            risk_percent: self.config.engine.risk_percent,
        };
        Some(tokio::spawn(async move {
            CommandHandler::new(client, ctx).run().await;
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn test_config(name: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.persistence.db_path = format!(
            "{}/aegis-app-{name}-{}.db",
            std::env::temp_dir().display(),
            std::process::id()
        );
        config.persistence.signal_log_path = format!(
            "{}/aegis-app-{name}-{}.csv",
            std::env::temp_dir().display(),
            std::process::id()
        );
        config
    }

    #[tokio::test]
    async fn test_application_wires_up() {
        let config = test_config("wires-up");
        let db_path = config.persistence.db_path.clone();

        let app = Application::new(config).unwrap();
        assert_eq!(app.machine.state(), RunState::Running);
        assert!(app.telegram.is_none());

        drop(app);
        let _ = std::fs::remove_file(db_path);
    }

    #[tokio::test]
    async fn test_transition_persistence() {
        let config = test_config("transitions");
        let db_path = config.persistence.db_path.clone();

        let mut app = Application::new(config).unwrap();
        app.machine
            .transition_to(RunState::Degraded, "test", "test", json!({}));
        app.persist_new_transitions();

        let decisions = app.store.recent_decisions(10, Some("SYSTEM")).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].decision_source, "SystemStateMachine");
        assert!(decisions[0].reason.contains("DEGRADED"));

        // Idempotent: nothing new to persist.
        app.persist_new_transitions();
        assert_eq!(app.store.recent_decisions(10, Some("SYSTEM")).unwrap().len(), 1);

        drop(app);
        let _ = std::fs::remove_file(db_path);
    }
}
