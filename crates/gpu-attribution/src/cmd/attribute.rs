use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use error_stack::Report;
use gpu_attribution::attribution::Attributor;
use gpu_attribution::attribution::DeviceAttribution;
use gpu_attribution::metrics::encoders::create_encoder;
use gpu_attribution::metrics::encoders::MetricsEncoder;
use gpu_attribution::metrics::now_nanos;
use gpu_attribution::DeviceProcessSource;
use gpu_attribution::EnvironmentReader;
use gpu_attribution::MetadataExtractor;
use gpu_attribution::ProcEnvironmentReader;
use gpu_attribution::ResolveError;
use tokio::task::JoinHandle;
use tokio::time;

use super::build_resolver;
use crate::config::AttributeArgs;
use crate::config::DeviceSettings;
use crate::config::FileConfig;
use crate::config::LookupSettings;

type CycleResult = Result<Vec<DeviceAttribution>, Report<ResolveError>>;

/// Runs one attribution cycle, or one per interval until interrupted.
pub async fn run(file: &FileConfig, args: &AttributeArgs) -> Result<()> {
    let device_settings = DeviceSettings::merge(file, &args.device);
    let lookup_settings = LookupSettings::merge(file, &args.lookup);
    let format = args.format.or(file.format).unwrap_or_default();
    let cycle_timeout = Duration::from_secs(args.timeout_secs);

    let resolver = build_resolver(&device_settings)?;
    tracing::info!(
        ?format,
        keys = lookup_settings.env_keys.len(),
        policy = ?resolver.policy(),
        "Starting attribution"
    );

    let extractor =
        MetadataExtractor::new(ProcEnvironmentReader::new(&lookup_settings.proc_root));
    let mut runner = CycleRunner::new(
        Attributor::new(resolver, extractor),
        lookup_settings.env_keys,
        cycle_timeout,
    );
    let encoder = create_encoder(format);

    let Some(interval_secs) = args.interval_secs else {
        let attributions = runner.run_cycle().await?.unwrap_or_default();
        return emit(encoder.as_ref(), &attributions);
    };

    watch(
        &mut runner,
        Duration::from_secs(interval_secs.max(1)),
        encoder.as_ref(),
        tokio::signal::ctrl_c(),
    )
    .await
}

/// Emits one cycle per `period` until `shutdown` resolves.
///
/// `shutdown` is polled while waiting for the next tick and while a cycle is
/// running.
async fn watch<S, R>(
    runner: &mut CycleRunner<S, R>,
    period: Duration,
    encoder: &dyn MetricsEncoder,
    shutdown: impl Future,
) -> Result<()>
where
    S: DeviceProcessSource + 'static,
    R: EnvironmentReader + 'static,
{
    tokio::pin!(shutdown);
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {}
        }

        let cycle = tokio::select! {
            _ = &mut shutdown => break,
            cycle = runner.run_cycle() => cycle,
        };

        match cycle {
            Ok(Some(attributions)) => emit(encoder, &attributions)?,
            Ok(None) => {}
            Err(e) => tracing::warn!(error = ?e, "Skipping attribution cycle"),
        }
    }

    tracing::info!("Interrupted, stopping attribution");
    Ok(())
}

/// Runs attribution cycles on the blocking pool, one at a time.
///
/// A cycle that exceeds the timeout cannot be cancelled, so its task is kept
/// and no new cycle starts until it has finished.
struct CycleRunner<S, R> {
    attributor: Arc<Attributor<S, R>>,
    lookup: Arc<HashMap<String, String>>,
    timeout: Duration,
    in_flight: Option<JoinHandle<CycleResult>>,
}

impl<S, R> CycleRunner<S, R>
where
    S: DeviceProcessSource + 'static,
    R: EnvironmentReader + 'static,
{
    fn new(
        attributor: Attributor<S, R>,
        lookup: HashMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            attributor: Arc::new(attributor),
            lookup: Arc::new(lookup),
            timeout,
            in_flight: None,
        }
    }

    fn is_idle(&self) -> bool {
        self.in_flight
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Runs one cycle bounded by the timeout.
    ///
    /// Returns `Ok(None)` without starting anything while an earlier cycle is
    /// still running.
    async fn run_cycle(&mut self) -> Result<Option<Vec<DeviceAttribution>>> {
        if !self.is_idle() {
            tracing::warn!("Previous attribution cycle is still running, skipping this one");
            return Ok(None);
        }

        let attributor = Arc::clone(&self.attributor);
        let lookup = Arc::clone(&self.lookup);
        let handle = self
            .in_flight
            .insert(tokio::task::spawn_blocking(move || {
                attributor.attribute(&lookup)
            }));

        let timeout = self.timeout;
        let joined = time::timeout(timeout, handle)
            .await
            .with_context(|| format!("Attribution cycle exceeded {timeout:?}"))?;
        self.in_flight = None;

        let result = joined.context("Attribution task panicked")?;
        result
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Device enumeration unavailable: {e:?}"))
    }
}

fn emit(encoder: &dyn MetricsEncoder, attributions: &[DeviceAttribution]) -> Result<()> {
    let timestamp = now_nanos();
    let mut stdout = std::io::stdout().lock();
    for attribution in attributions {
        stdout.write_all(
            encoder
                .encode_device_attribution(attribution, timestamp)
                .as_bytes(),
        )?;
    }
    stdout.flush()?;
    Ok(())
}
