//! Static rule graph construction and validation
//!
//! Built once from the registry before any execution. For every declared
//! root query the builder computes, per (product type, available param
//! types) combination, either a unique plan of rule applications or a
//! construction error. Ambiguity, unreachability, and unterminated rule
//! cycles are compile-time failures here, never runtime surprises.

use crate::error::RuleGraphError;
use crate::params::format_type_set;
use crate::rules::{RuleId, RuleRegistry};
use crate::selector::Selector;
use quarry_types::ProductType;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// A (product type, available parameter types) combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct EntryKey {
    pub(crate) product: ProductType,
    pub(crate) params: BTreeSet<ProductType>,
}

impl EntryKey {
    pub(crate) fn new(product: ProductType, params: BTreeSet<ProductType>) -> Self {
        EntryKey { product, params }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.product, format_type_set(&self.params))
    }
}

/// How one selector of a resolved rule is satisfied.
#[derive(Debug, Clone)]
pub(crate) enum DepResolution {
    /// Taken directly from the request parameters.
    Param(ProductType),
    /// Produced by the resolution for this entry key.
    Entry(EntryKey),
}

/// A uniquely resolved rule application for an entry.
#[derive(Debug, Clone)]
pub(crate) struct RuleResolution {
    pub(crate) rule: RuleId,
    /// One entry per selector, in declaration order.
    pub(crate) deps: Vec<DepResolution>,
    /// Parameter types this plan consumes, directly or transitively.
    /// Drives the most-specific-match disambiguation.
    pub(crate) consumed: BTreeSet<ProductType>,
}

/// The resolution for an entry key.
#[derive(Debug, Clone)]
pub(crate) enum Resolution {
    /// The product is itself an available parameter. Parameters always win
    /// over rules that could derive the same type.
    Param(ProductType),
    /// A unique rule application.
    Rule(RuleResolution),
}

/// Outcome of matching a requested (product, provided params) pair against
/// the declared root queries.
#[derive(Debug)]
pub(crate) enum RootMatch<'a> {
    /// No declared query covers the request.
    None,
    /// A single most-specific query.
    One(&'a EntryKey),
    /// Distinct queries tie on specificity. The engine refuses to pick
    /// one silently.
    Ambiguous(Vec<&'a EntryKey>),
}

#[cfg(test)]
impl<'a> RootMatch<'a> {
    fn unique(self) -> Option<&'a EntryKey> {
        match self {
            RootMatch::One(key) => Some(key),
            _ => None,
        }
    }
}

/// The immutable compiled rule graph.
///
/// Holds a resolution for every entry reachable from the declared root
/// queries. Construction failure is fatal: no partial graph is usable.
#[derive(Debug)]
pub struct RuleGraph {
    resolutions: HashMap<EntryKey, Resolution>,
    roots: Vec<EntryKey>,
}

impl RuleGraph {
    /// Compile the rule graph for every declared root query.
    pub fn build(registry: &RuleRegistry) -> Result<Self, RuleGraphError> {
        let mut builder = Builder {
            registry,
            resolutions: HashMap::new(),
            unreachable: HashMap::new(),
            in_progress: HashSet::new(),
        };

        let mut roots = Vec::new();
        for query in registry.queries() {
            let key = EntryKey::new(query.product, query.param_types.clone());
            match builder.resolve(&key) {
                Ok(_) => roots.push(key),
                Err(ResolveErr::Fatal(e)) => return Err(e),
                Err(ResolveErr::Blocked(blocked)) => {
                    return Err(if blocked.via_cycle {
                        RuleGraphError::CyclicRuleDependency {
                            chain: blocked.trail,
                        }
                    } else {
                        RuleGraphError::UnreachableProduct {
                            product: key.product.name().to_string(),
                            params: format_type_set(&key.params),
                            trail: blocked.trail,
                        }
                    });
                }
            }
        }

        tracing::debug!(
            entries = builder.resolutions.len(),
            roots = roots.len(),
            "rule graph compiled"
        );

        Ok(RuleGraph {
            resolutions: builder.resolutions,
            roots,
        })
    }

    /// The declared root entry matching a requested product and provided
    /// parameter types: the registered query whose parameter types are the
    /// largest subset of what was provided. Distinct queries tying on size
    /// are reported rather than resolved by declaration order.
    pub(crate) fn root_for(
        &self,
        product: ProductType,
        provided: &BTreeSet<ProductType>,
    ) -> RootMatch<'_> {
        let mut best: Vec<&EntryKey> = Vec::new();
        for key in &self.roots {
            if key.product != product || !key.params.is_subset(provided) {
                continue;
            }
            match best.first().map(|leader| leader.params.len()) {
                Some(len) if key.params.len() < len => {}
                Some(len) if key.params.len() == len => {
                    if !best.iter().any(|k| k.params == key.params) {
                        best.push(key);
                    }
                }
                _ => {
                    best.clear();
                    best.push(key);
                }
            }
        }
        match best.len() {
            0 => RootMatch::None,
            1 => RootMatch::One(best[0]),
            _ => RootMatch::Ambiguous(best),
        }
    }

    pub(crate) fn resolution(&self, key: &EntryKey) -> Option<&Resolution> {
        self.resolutions.get(key)
    }

    /// Number of resolved entries.
    pub fn len(&self) -> usize {
        self.resolutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolutions.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        resolutions: HashMap<EntryKey, Resolution>,
        roots: Vec<EntryKey>,
    ) -> Self {
        RuleGraph { resolutions, roots }
    }
}

/// Why an entry could not be resolved through the current path.
#[derive(Debug, Clone)]
struct Blocked {
    /// At least one candidate was rejected because it re-entered an entry
    /// currently being resolved. Cycle-tainted verdicts are path-dependent
    /// and therefore never memoized.
    via_cycle: bool,
    trail: Vec<String>,
}

enum ResolveErr {
    Blocked(Blocked),
    Fatal(RuleGraphError),
}

struct Builder<'r> {
    registry: &'r RuleRegistry,
    resolutions: HashMap<EntryKey, Resolution>,
    /// Memoized cycle-free unreachability verdicts.
    unreachable: HashMap<EntryKey, Vec<String>>,
    in_progress: HashSet<EntryKey>,
}

struct Candidate {
    rule: RuleId,
    deps: Vec<DepResolution>,
    consumed: BTreeSet<ProductType>,
}

impl<'r> Builder<'r> {
    fn resolve(&mut self, key: &EntryKey) -> Result<Resolution, ResolveErr> {
        if let Some(resolution) = self.resolutions.get(key) {
            return Ok(resolution.clone());
        }
        if let Some(trail) = self.unreachable.get(key) {
            return Err(ResolveErr::Blocked(Blocked {
                via_cycle: false,
                trail: trail.clone(),
            }));
        }
        if key.params.contains(&key.product) {
            let resolution = Resolution::Param(key.product);
            self.resolutions.insert(key.clone(), resolution.clone());
            return Ok(resolution);
        }
        if self.in_progress.contains(key) {
            return Err(ResolveErr::Blocked(Blocked {
                via_cycle: true,
                trail: vec![key.to_string()],
            }));
        }

        self.in_progress.insert(key.clone());
        let outcome = self.resolve_candidates(key);
        self.in_progress.remove(key);

        match outcome {
            Ok(resolution) => {
                self.resolutions.insert(key.clone(), resolution.clone());
                Ok(resolution)
            }
            Err(ResolveErr::Blocked(blocked)) => {
                if !blocked.via_cycle {
                    self.unreachable.insert(key.clone(), blocked.trail.clone());
                }
                Err(ResolveErr::Blocked(blocked))
            }
            err => err,
        }
    }

    fn resolve_candidates(&mut self, key: &EntryKey) -> Result<Resolution, ResolveErr> {
        let mut applicable: Vec<Candidate> = Vec::new();
        let mut attempted: Vec<String> = Vec::new();
        let mut cycle_trail: Option<Vec<String>> = None;

        for &rule_id in self.registry.rules_for(key.product) {
            match self.try_candidate(key, rule_id)? {
                Ok(candidate) => applicable.push(candidate),
                Err(rejection) => {
                    if let Some(trail) = rejection.cycle_trail {
                        let mut chain = vec![key.to_string()];
                        chain.extend(trail);
                        cycle_trail.get_or_insert(chain);
                    }
                    attempted.push(rejection.description);
                }
            }
        }

        if applicable.is_empty() {
            return Err(ResolveErr::Blocked(match cycle_trail {
                Some(trail) => Blocked {
                    via_cycle: true,
                    trail,
                },
                None => Blocked {
                    via_cycle: false,
                    trail: attempted,
                },
            }));
        }

        if applicable.len() == 1 {
            let candidate = applicable.pop().expect("len checked");
            return Ok(Resolution::Rule(RuleResolution {
                rule: candidate.rule,
                deps: candidate.deps,
                consumed: candidate.consumed,
            }));
        }

        // Most specific parameter match: a candidate wins only if its
        // consumed set strictly contains every competitor's. Incomparable
        // survivors are an error, not a silent pick.
        let winner_idx = applicable
            .iter()
            .enumerate()
            .max_by_key(|(_, c)| c.consumed.len())
            .map(|(i, _)| i)
            .expect("non-empty");
        let strictly_dominates = applicable.iter().enumerate().all(|(i, c)| {
            i == winner_idx
                || (c.consumed.is_subset(&applicable[winner_idx].consumed)
                    && c.consumed != applicable[winner_idx].consumed)
        });

        if strictly_dominates {
            let candidate = applicable.swap_remove(winner_idx);
            return Ok(Resolution::Rule(RuleResolution {
                rule: candidate.rule,
                deps: candidate.deps,
                consumed: candidate.consumed,
            }));
        }

        Err(ResolveErr::Fatal(RuleGraphError::AmbiguousRule {
            product: key.product.name().to_string(),
            params: format_type_set(&key.params),
            candidates: applicable
                .iter()
                .map(|c| self.registry.rule(c.rule).name().to_string())
                .collect(),
        }))
    }

    /// Attempt to satisfy every selector of one candidate rule.
    ///
    /// The outer `Result` carries fatal construction errors; the inner one
    /// distinguishes an applicable candidate from a rejection.
    fn try_candidate(
        &mut self,
        key: &EntryKey,
        rule_id: RuleId,
    ) -> Result<Result<Candidate, Rejection>, ResolveErr> {
        let rule = self.registry.rule(rule_id);
        let rule_name = rule.name().to_string();
        let selectors: Vec<Selector> = rule.selectors().to_vec();

        let mut deps = Vec::with_capacity(selectors.len());
        let mut consumed = BTreeSet::new();

        for selector in selectors {
            match selector {
                Selector::Param(t) => {
                    if key.params.contains(&t) {
                        deps.push(DepResolution::Param(t));
                        consumed.insert(t);
                    } else {
                        return Ok(Err(Rejection {
                            description: format!(
                                "{rule_name} (requires explicit param {t})"
                            ),
                            cycle_trail: None,
                        }));
                    }
                }
                Selector::Select(t) => {
                    if key.params.contains(&t) {
                        deps.push(DepResolution::Param(t));
                        consumed.insert(t);
                        continue;
                    }
                    let subkey = EntryKey::new(t, key.params.clone());
                    match self.resolve(&subkey) {
                        Ok(resolution) => {
                            if let Resolution::Rule(rr) = &resolution {
                                consumed.extend(rr.consumed.iter().copied());
                            }
                            deps.push(DepResolution::Entry(subkey));
                        }
                        Err(ResolveErr::Fatal(e)) => return Err(ResolveErr::Fatal(e)),
                        Err(ResolveErr::Blocked(blocked)) => {
                            return Ok(Err(Rejection {
                                description: format!("{rule_name} (no source of {t})"),
                                cycle_trail: blocked.via_cycle.then_some(blocked.trail),
                            }));
                        }
                    }
                }
            }
        }

        Ok(Ok(Candidate {
            rule: rule_id,
            deps,
            consumed,
        }))
    }
}

struct Rejection {
    description: String,
    cycle_trail: Option<Vec<String>>,
}
