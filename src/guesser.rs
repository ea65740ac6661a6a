//! Recovers remote method tables by calling candidate signatures and watching
//! how dispatch reacts.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::vec;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::call::{invoke, CallFrame, DispatchMode, LegacyMode, Selector};
use crate::candidate::{LegacyInterface, MethodCandidate};
use crate::directory::{BoundName, Directory};
use crate::endpoint::Endpoint;
use crate::protocol::ObjId;
use crate::response::{RejectionKind, ResponseClass};
use crate::session::Session;

/// Methods found per bound name.
pub type GuessResult = BTreeMap<String, Vec<MethodCandidate>>;

#[derive(Debug, Clone)]
pub struct GuessOptions {
    /// Number of workers, each with its own connections.
    pub threads: usize,
    /// Extra attempts after an i/o error or timeout.
    pub retries: u32,
    /// Only try methods without parameters.
    pub zero_arg: bool,
    pub legacy: LegacyMode,
}

impl Default for GuessOptions {
    fn default() -> Self {
        Self {
            threads: 5,
            retries: 3,
            zero_arg: false,
            legacy: LegacyMode::Auto,
        }
    }
}

/// A remote object to guess on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuessTarget {
    pub bound_name: String,
    pub endpoint: Endpoint,
    pub obj_id: ObjId,
    pub class_name: Option<String>,
}

impl GuessTarget {
    /// `None` when the bound name has no usable reference.
    pub fn from_bound(bound: &BoundName) -> Option<Self> {
        let reference = bound.reference.as_ref()?;
        Some(Self {
            bound_name: bound.name.clone(),
            endpoint: reference.endpoint.clone(),
            obj_id: reference.obj_id,
            class_name: bound.declared_class.clone(),
        })
    }
}

struct Job {
    target: usize,
    candidate: MethodCandidate,
    /// Tried in order while the object reports an unknown method.
    selectors: Vec<Selector>,
}

pub struct MethodGuesser {
    template: Session,
    options: GuessOptions,
    stop: Arc<AtomicBool>,
}

impl MethodGuesser {
    /// `template` supplies the dialer and session options for every
    /// connection the workers open.
    pub fn new(template: Session, options: GuessOptions) -> Self {
        Self {
            template,
            options,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the flag stops workers from taking further candidates. Calls
    /// already sent are completed.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub async fn guess(
        &self,
        directory: &mut Directory,
        candidates: &[MethodCandidate],
        filter: Option<&[String]>,
    ) -> GuessResult {
        let names = directory.list_bound_names(filter);
        let bound = directory.resolve_classes(names).await;
        let targets: Vec<GuessTarget> = bound
            .iter()
            .filter_map(|bound| {
                let target = GuessTarget::from_bound(bound);
                if target.is_none() {
                    warn!(bound_name = %bound.name, "no remote reference, skipping");
                }
                target
            })
            .collect();

        let mut result = self.guess_targets(&targets, candidates).await;
        add_known_methods(&mut result, &bound);
        result
    }

    pub async fn guess_targets(
        &self,
        targets: &[GuessTarget],
        candidates: &[MethodCandidate],
    ) -> GuessResult {
        let mut candidates: Vec<MethodCandidate> = candidates
            .iter()
            .filter(|candidate| !self.options.zero_arg || candidate.arity() == 0)
            .cloned()
            .collect();
        candidates.sort();
        candidates.dedup();

        let jobs = self.jobs(targets, &candidates);
        info!(
            targets = targets.len(),
            candidates = candidates.len(),
            calls = jobs.len(),
            threads = self.options.threads,
            "guessing methods"
        );

        let jobs = Mutex::new(jobs.into_iter());
        let results = Mutex::new(
            targets
                .iter()
                .map(|target| (target.bound_name.clone(), Vec::new()))
                .collect::<GuessResult>(),
        );
        let workers = (0..self.options.threads.max(1))
            .map(|worker| self.worker(worker, targets, &jobs, &results));
        join_all(workers).await;

        let mut result = results.into_inner();
        for methods in result.values_mut() {
            methods.sort();
            methods.dedup();
        }
        result
    }

    fn jobs(&self, targets: &[GuessTarget], candidates: &[MethodCandidate]) -> Vec<Job> {
        let mut legacy_table: Option<LegacyInterface> = None;
        let mut jobs = Vec::with_capacity(targets.len() * candidates.len());
        for (index, target) in targets.iter().enumerate() {
            let modes = self.options.legacy.dispatch_order(target.class_name.as_deref());
            for candidate in candidates {
                let selectors: Vec<Selector> = modes
                    .iter()
                    .filter_map(|mode| match mode {
                        DispatchMode::Modern => Some(candidate.selector()),
                        DispatchMode::Legacy => legacy_table
                            .get_or_insert_with(|| LegacyInterface::from_candidates(candidates))
                            .selector_for(candidate),
                    })
                    .collect();
                if selectors.is_empty() {
                    continue;
                }
                jobs.push(Job {
                    target: index,
                    candidate: candidate.clone(),
                    selectors,
                });
            }
        }
        jobs
    }

    async fn worker(
        &self,
        id: usize,
        targets: &[GuessTarget],
        jobs: &Mutex<vec::IntoIter<Job>>,
        results: &Mutex<GuessResult>,
    ) {
        let mut sessions: HashMap<Endpoint, Session> = HashMap::new();
        loop {
            if self.stop.load(Ordering::SeqCst) {
                debug!(worker = id, "stopped");
                break;
            }
            let next = jobs.lock().next();
            let Some(job) = next else { break };
            let target = &targets[job.target];
            let session = sessions
                .entry(target.endpoint.clone())
                .or_insert_with(|| self.template.to(target.endpoint.clone()));

            if self.probe(session, target, &job).await {
                info!(
                    bound_name = %target.bound_name,
                    signature = %job.candidate,
                    "found method"
                );
                results
                    .lock()
                    .entry(target.bound_name.clone())
                    .or_default()
                    .push(job.candidate);
            }
        }
        for session in sessions.values_mut() {
            session.close().await;
        }
    }

    /// True when the call reached a method body.
    async fn probe(&self, session: &mut Session, target: &GuessTarget, job: &Job) -> bool {
        for &selector in &job.selectors {
            let Some(response) = self.call(session, target, &job.candidate, selector).await else {
                return false;
            };
            if response.reached_method() {
                return true;
            }
            if response.rejection_kind() != Some(RejectionKind::UnknownMethod) {
                return false;
            }
        }
        false
    }

    /// `None` once the retries are used up.
    async fn call(
        &self,
        session: &mut Session,
        target: &GuessTarget,
        candidate: &MethodCandidate,
        selector: Selector,
    ) -> Option<ResponseClass> {
        let frame = CallFrame::placeholders(target.obj_id, selector, candidate.params())
            .returning(candidate.return_type());
        let mut attempt = 0;
        loop {
            match invoke(session, &frame).await {
                Ok(response) => {
                    debug!(
                        bound_name = %target.bound_name,
                        signature = %candidate,
                        mode = ?selector.mode(),
                        response = %response,
                        "probed"
                    );
                    return Some(response);
                }
                Err(err) if err.is_transient() && attempt < self.options.retries => {
                    attempt += 1;
                    debug!(
                        bound_name = %target.bound_name,
                        signature = %candidate,
                        attempt,
                        error = %err,
                        "retrying"
                    );
                }
                Err(err) => {
                    warn!(
                        bound_name = %target.bound_name,
                        signature = %candidate,
                        attempt,
                        error = %err,
                        "giving up, treating method as not present"
                    );
                    return None;
                }
            }
        }
    }
}

/// Adds the catalog methods of every bound name that resolved to a known
/// interface.
pub fn add_known_methods(result: &mut GuessResult, bound: &[BoundName]) {
    for entry in bound {
        let Some(known) = entry.known_interface() else {
            continue;
        };
        let methods = result.entry(entry.name.clone()).or_default();
        methods.extend(known.candidates());
        methods.sort();
        methods.dedup();
    }
}
