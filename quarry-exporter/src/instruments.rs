//! Instrument construction and registry reconciliation.
//!
//! The exporter owns a private [`Registry`]: instruments come and go on every
//! configuration apply, which the default global registry cannot express
//! without leaking collectors. Uniqueness is enforced by fingerprint (metric
//! name plus sorted constant labels) and help strings are pinned to the first
//! definition seen for a name, so later specs cannot destabilize the family.

use std::collections::{HashMap, HashSet};

use prometheus::core::{Collector, Desc};
use prometheus::proto::{self, MetricType};
use prometheus::{Counter, Gauge, Histogram, HistogramOpts, Opts, Registry};
use tracing::{debug, warn};

use quarry_common::{MetricKind, MetricSpec};

/// Uniqueness key for an instrument: metric name plus sorted constant labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    name: String,
    labels: Vec<(String, String)>,
}

impl Fingerprint {
    pub fn of(spec: &MetricSpec) -> Self {
        Self {
            name: spec.name.clone(),
            // The spec keeps labels in a sorted map, so iteration order is
            // already canonical.
            labels: spec
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// The write side of one registered instrument.
#[derive(Clone)]
pub enum InstrumentWriter {
    Gauge(Gauge),
    Counter(Counter),
    Histogram(Histogram),
    Summary(UnobservedSummary),
}

impl InstrumentWriter {
    /// Whether a collected scalar has anywhere to go. Histogram and summary
    /// instruments expose their family but observe nothing: the collection
    /// pipeline reads one scalar per round, which is not a distribution.
    pub fn accepts_samples(&self) -> bool {
        matches!(self, Self::Gauge(_) | Self::Counter(_))
    }

    /// Write one collected value.
    ///
    /// Gauges take any value including NaN. Counters get replace-on-collect
    /// semantics (reset + add); NaN and negative samples cannot be
    /// represented and are dropped.
    pub fn set(&self, value: f64) {
        match self {
            Self::Gauge(gauge) => gauge.set(value),
            Self::Counter(counter) => {
                if value.is_finite() && value >= 0.0 {
                    counter.reset();
                    counter.inc_by(value);
                } else {
                    debug!(value, "Counter cannot represent sample, skipping write");
                }
            }
            Self::Histogram(_) | Self::Summary(_) => {}
        }
    }

    /// A boxed collector sharing this instrument's storage, for
    /// register/unregister calls.
    pub fn collector(&self) -> Box<dyn Collector> {
        match self {
            Self::Gauge(gauge) => Box::new(gauge.clone()),
            Self::Counter(counter) => Box::new(counter.clone()),
            Self::Histogram(histogram) => Box::new(histogram.clone()),
            Self::Summary(summary) => Box::new(summary.clone()),
        }
    }
}

/// One live metric: its spec and the registered instrument.
#[derive(Clone)]
pub struct InstrumentHandle {
    pub spec: MetricSpec,
    pub writer: InstrumentWriter,
}

impl InstrumentHandle {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.spec)
    }
}

/// Whether two specs describe the same registered instrument. Query-side
/// fields (source, connection, query, result field) can change without
/// touching the registry; these cannot.
fn shape_equal(a: &MetricSpec, b: &MetricSpec) -> bool {
    a.help == b.help && a.kind == b.kind && a.buckets == b.buckets && a.objectives == b.objectives
}

/// Reconcile the registry against a new spec list.
///
/// Existing instruments whose fingerprint and shape are unchanged are kept as
/// they are (an apply with an identical config re-registers nothing). Shape
/// changes and removals unregister the old instrument; new specs register
/// fresh ones. On a registration failure every registration from this apply
/// is rolled back and the displaced instruments are restored, leaving the
/// registry as it was.
pub fn reconcile(
    registry: &Registry,
    current: &[InstrumentHandle],
    specs: &[MetricSpec],
) -> Result<Vec<InstrumentHandle>, prometheus::Error> {
    enum Planned {
        Reused(InstrumentHandle),
        Fresh(InstrumentHandle),
    }

    let mut available: HashMap<Fingerprint, &InstrumentHandle> =
        current.iter().map(|h| (h.fingerprint(), h)).collect();

    let mut seen: HashSet<Fingerprint> = HashSet::new();
    let mut help_by_name: HashMap<String, String> = HashMap::new();
    let mut planned: Vec<Planned> = Vec::new();
    let mut replaced: Vec<&InstrumentHandle> = Vec::new();

    for spec in specs {
        let mut spec = spec.clone();

        let fingerprint = Fingerprint::of(&spec);
        if !seen.insert(fingerprint.clone()) {
            warn!(
                metric = %spec.name,
                "Duplicate metric definition (same name and labels), skipping"
            );
            continue;
        }

        match help_by_name.get(&spec.name) {
            Some(first) => {
                if spec.help != *first {
                    warn!(
                        metric = %spec.name,
                        kept = %first,
                        dropped = %spec.help,
                        "Inconsistent help strings for metric, keeping the first definition"
                    );
                    spec.help = first.clone();
                }
            }
            None => {
                help_by_name.insert(spec.name.clone(), spec.help.clone());
            }
        }

        if let Some(existing) = available.remove(&fingerprint) {
            if shape_equal(&existing.spec, &spec) {
                planned.push(Planned::Reused(InstrumentHandle {
                    spec,
                    writer: existing.writer.clone(),
                }));
                continue;
            }
            replaced.push(existing);
        }

        let writer = make_writer(&spec)?;
        planned.push(Planned::Fresh(InstrumentHandle { spec, writer }));
    }

    // Everything left in `available` has no spec anymore; together with the
    // shape-changed instruments it leaves the registry before fresh
    // registrations, so a changed help cannot collide with its old self.
    let stale: Vec<&InstrumentHandle> = replaced
        .into_iter()
        .chain(available.into_values())
        .collect();
    for handle in &stale {
        let _ = registry.unregister(handle.writer.collector());
    }

    let mut registered: Vec<&InstrumentHandle> = Vec::new();
    for item in &planned {
        if let Planned::Fresh(handle) = item {
            if let Err(err) = registry.register(handle.writer.collector()) {
                for done in registered {
                    let _ = registry.unregister(done.writer.collector());
                }
                for old in &stale {
                    let _ = registry.register(old.writer.collector());
                }
                return Err(err);
            }
            registered.push(handle);
        }
    }

    Ok(planned
        .into_iter()
        .map(|p| match p {
            Planned::Reused(h) | Planned::Fresh(h) => h,
        })
        .collect())
}

fn make_writer(spec: &MetricSpec) -> Result<InstrumentWriter, prometheus::Error> {
    // The registry refuses empty help strings; fall back to the name.
    let help = if spec.help.is_empty() {
        spec.name.clone()
    } else {
        spec.help.clone()
    };
    let const_labels: HashMap<String, String> = spec
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    match spec.kind {
        MetricKind::Gauge => {
            let opts = Opts::new(&spec.name, &help).const_labels(const_labels);
            Ok(InstrumentWriter::Gauge(Gauge::with_opts(opts)?))
        }
        MetricKind::Counter => {
            let opts = Opts::new(&spec.name, &help).const_labels(const_labels);
            Ok(InstrumentWriter::Counter(Counter::with_opts(opts)?))
        }
        MetricKind::Histogram => {
            let opts = HistogramOpts::new(&spec.name, &help)
                .const_labels(const_labels)
                .buckets(spec.buckets.clone());
            Ok(InstrumentWriter::Histogram(Histogram::with_opts(opts)?))
        }
        MetricKind::Summary => {
            let objectives = spec
                .parsed_objectives()
                .map_err(|e| prometheus::Error::Msg(e.to_string()))?;
            Ok(InstrumentWriter::Summary(UnobservedSummary::new(
                &spec.name,
                &help,
                const_labels,
                &objectives,
            )?))
        }
    }
}

/// Exposition-only summary.
///
/// The library has no summary instrument, and this pipeline could not feed
/// one anyway (one scalar per round is not an observation stream). This
/// collector exposes the family the way an unobserved summary looks: zero
/// count, zero sum, configured quantiles with NaN values.
#[derive(Clone)]
pub struct UnobservedSummary {
    desc: Desc,
    name: String,
    help: String,
    labels: Vec<(String, String)>,
    quantiles: Vec<f64>,
}

impl UnobservedSummary {
    pub fn new(
        name: &str,
        help: &str,
        const_labels: HashMap<String, String>,
        objectives: &[(f64, f64)],
    ) -> Result<Self, prometheus::Error> {
        let mut labels: Vec<(String, String)> = const_labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        labels.sort();
        let desc = Desc::new(name.to_string(), help.to_string(), Vec::new(), const_labels)?;
        Ok(Self {
            desc,
            name: name.to_string(),
            help: help.to_string(),
            labels,
            quantiles: objectives.iter().map(|&(q, _)| q).collect(),
        })
    }
}

impl Collector for UnobservedSummary {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        let mut summary = proto::Summary::default();
        summary.set_sample_count(0);
        summary.set_sample_sum(0.0);
        let quantiles: Vec<proto::Quantile> = self
            .quantiles
            .iter()
            .map(|&q| {
                let mut quantile = proto::Quantile::default();
                quantile.set_quantile(q);
                quantile.set_value(f64::NAN);
                quantile
            })
            .collect();
        summary.set_quantile(quantiles.into());

        let label_pairs: Vec<proto::LabelPair> = self
            .labels
            .iter()
            .map(|(k, v)| {
                let mut pair = proto::LabelPair::default();
                pair.set_name(k.clone());
                pair.set_value(v.clone());
                pair
            })
            .collect();

        let mut metric = proto::Metric::default();
        metric.set_label(label_pairs.into());
        metric.set_summary(summary);

        let mut family = proto::MetricFamily::default();
        family.set_name(self.name.clone());
        family.set_help(self.help.clone());
        family.set_field_type(MetricType::SUMMARY);
        family.set_metric(vec![metric].into());
        vec![family]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use quarry_common::MetricSource;

    fn spec(name: &str, help: &str) -> MetricSpec {
        MetricSpec {
            name: name.to_string(),
            help: help.to_string(),
            kind: MetricKind::Gauge,
            source: MetricSource::Http,
            connection: String::new(),
            query: String::new(),
            result_field: String::new(),
            labels: BTreeMap::new(),
            buckets: Vec::new(),
            objectives: BTreeMap::new(),
        }
    }

    fn spec_with_labels(name: &str, labels: &[(&str, &str)]) -> MetricSpec {
        let mut s = spec(name, "help");
        s.labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        s
    }

    fn family<'a>(
        families: &'a [proto::MetricFamily],
        name: &str,
    ) -> Option<&'a proto::MetricFamily> {
        families.iter().find(|f| f.get_name() == name)
    }

    #[test]
    fn fingerprint_distinguishes_labels() {
        let a = Fingerprint::of(&spec_with_labels("m", &[("env", "prod")]));
        let b = Fingerprint::of(&spec_with_labels("m", &[("env", "dev")]));
        let c = Fingerprint::of(&spec_with_labels("m", &[("env", "prod")]));
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn duplicate_fingerprints_are_skipped() {
        let registry = Registry::new();
        let specs = vec![spec("x", "A"), spec("x", "A")];
        let handles = reconcile(&registry, &[], &specs).unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(registry.gather().len(), 1);
    }

    #[test]
    fn help_is_stabilized_to_first_definition() {
        let registry = Registry::new();
        let specs = vec![
            spec_with_labels("x", &[("side", "left")]),
            {
                let mut s = spec_with_labels("x", &[("side", "right")]);
                s.help = "different".to_string();
                s
            },
        ];
        let handles = reconcile(&registry, &[], &specs).unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].spec.help, handles[1].spec.help);

        let families = registry.gather();
        let fam = family(&families, "x").expect("family registered");
        assert_eq!(fam.get_help(), "help");
        assert_eq!(fam.get_metric().len(), 2);
    }

    #[test]
    fn unchanged_specs_reuse_instruments() {
        let registry = Registry::new();
        let specs = vec![spec("kept", "same")];

        let first = reconcile(&registry, &[], &specs).unwrap();
        first[0].writer.set(42.0);

        let second = reconcile(&registry, &first, &specs).unwrap();
        let families = registry.gather();
        let fam = family(&families, "kept").unwrap();
        // A re-registered instrument would have reset to zero.
        assert_eq!(fam.get_metric()[0].get_gauge().get_value(), 42.0);

        second[0].writer.set(7.0);
        let families = registry.gather();
        assert_eq!(
            family(&families, "kept").unwrap().get_metric()[0]
                .get_gauge()
                .get_value(),
            7.0
        );
    }

    #[test]
    fn shape_change_replaces_the_instrument() {
        let registry = Registry::new();
        let first = reconcile(&registry, &[], &[spec("m", "old help")]).unwrap();
        first[0].writer.set(5.0);

        let second = reconcile(&registry, &first, &[spec("m", "new help")]).unwrap();
        assert_eq!(second.len(), 1);

        let families = registry.gather();
        let fam = family(&families, "m").unwrap();
        assert_eq!(fam.get_help(), "new help");
        assert_eq!(fam.get_metric()[0].get_gauge().get_value(), 0.0);
    }

    #[test]
    fn removed_specs_are_unregistered() {
        let registry = Registry::new();
        let first = reconcile(&registry, &[], &[spec("a", "h"), spec("b", "h")]).unwrap();
        assert_eq!(registry.gather().len(), 2);

        let second = reconcile(&registry, &first, &[spec("b", "h")]).unwrap();
        assert_eq!(second.len(), 1);
        let families = registry.gather();
        assert!(family(&families, "a").is_none());
        assert!(family(&families, "b").is_some());
    }

    #[test]
    fn registration_conflict_rolls_back_the_apply() {
        let registry = Registry::new();
        // Occupy the name with a different help so the fresh registration
        // below must fail.
        let blocker = Gauge::with_opts(Opts::new("x", "occupied")).unwrap();
        registry.register(Box::new(blocker)).unwrap();

        let result = reconcile(&registry, &[], &[spec("fresh", "h"), spec("x", "mine")]);
        assert!(result.is_err());

        let families = registry.gather();
        assert!(family(&families, "fresh").is_none(), "apply must roll back");
        assert_eq!(family(&families, "x").unwrap().get_help(), "occupied");
    }

    #[test]
    fn counter_writes_are_replace_on_collect() {
        let registry = Registry::new();
        let mut s = spec("jobs_total", "h");
        s.kind = MetricKind::Counter;
        let handles = reconcile(&registry, &[], &[s]).unwrap();

        handles[0].writer.set(5.0);
        handles[0].writer.set(3.0);
        let families = registry.gather();
        let fam = family(&families, "jobs_total").unwrap();
        assert_eq!(fam.get_metric()[0].get_counter().get_value(), 3.0);

        // NaN (a failed collection) cannot be represented; the value stays.
        handles[0].writer.set(f64::NAN);
        let families = registry.gather();
        assert_eq!(
            family(&families, "jobs_total").unwrap().get_metric()[0]
                .get_counter()
                .get_value(),
            3.0
        );
    }

    #[test]
    fn histogram_and_summary_register_without_observations() {
        let registry = Registry::new();
        let mut histogram = spec("latency", "h");
        histogram.kind = MetricKind::Histogram;
        histogram.buckets = vec![0.1, 0.5, 1.0];
        let mut summary = spec("sizes", "h");
        summary.kind = MetricKind::Summary;
        summary.objectives = [("0.5".to_string(), 0.05), ("0.99".to_string(), 0.001)]
            .into_iter()
            .collect();

        let handles = reconcile(&registry, &[], &[histogram, summary]).unwrap();
        assert!(handles.iter().all(|h| !h.writer.accepts_samples()));

        let families = registry.gather();
        let hist = family(&families, "latency").unwrap();
        assert_eq!(hist.get_field_type(), MetricType::HISTOGRAM);
        assert_eq!(hist.get_metric()[0].get_histogram().get_sample_count(), 0);

        let summ = family(&families, "sizes").unwrap();
        assert_eq!(summ.get_field_type(), MetricType::SUMMARY);
        assert_eq!(summ.get_metric()[0].get_summary().get_quantile().len(), 2);
    }
}
