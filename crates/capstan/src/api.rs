//! The polymorphic command surface: string argv in, JSON values out.
//!
//! Every argument arrives as a string; integers and JSON blobs are parsed
//! here, and any syntactic problem — missing required arguments, trailing
//! extras, non-numeric where numeric, non-JSON where JSON — is a
//! [`Error::Malformed`] before the engine is touched. [`dispatch`] maps the
//! command name to its handler over `(now, argv)`; the engine never
//! introspects the caller.

use serde_json::{json, Value};

use crate::engine::{CompleteOptions, PutOptions, PutOutcome, NOT_REPLACED};
use crate::error::{Error, Result};
use crate::query::QueueJobsState;
use crate::recurring::RecurOptions;
use crate::store::{Store, Timestamp};
use crate::Engine;

/// A cursor over a command's string arguments.
struct Args<'a> {
    command: &'static str,
    argv: &'a [String],
    pos: usize,
}

impl<'a> Args<'a> {
    fn new(command: &'static str, argv: &'a [String]) -> Self {
        Args {
            command,
            argv,
            pos: 0,
        }
    }

    fn malformed(&self, message: impl Into<String>) -> Error {
        Error::malformed(self.command, message)
    }

    /// The next argument, or `Malformed` naming what was missing.
    fn req_str(&mut self, name: &str) -> Result<String> {
        match self.argv.get(self.pos) {
            Some(arg) => {
                self.pos += 1;
                Ok(arg.clone())
            }
            None => Err(self.malformed(format!("missing {name}"))),
        }
    }

    /// The next argument if any.
    fn opt_str(&mut self) -> Option<String> {
        let arg = self.argv.get(self.pos).cloned();
        if arg.is_some() {
            self.pos += 1;
        }
        arg
    }

    fn req_i64(&mut self, name: &str) -> Result<i64> {
        let raw = self.req_str(name)?;
        raw.parse::<i64>()
            .map_err(|_| self.malformed(format!("{name} must be a number, got {raw:?}")))
    }

    fn req_usize(&mut self, name: &str) -> Result<usize> {
        let n = self.req_i64(name)?;
        usize::try_from(n).map_err(|_| self.malformed(format!("{name} must be non-negative")))
    }

    fn opt_usize(&mut self, name: &str) -> Result<Option<usize>> {
        match self.argv.get(self.pos) {
            Some(_) => Ok(Some(self.req_usize(name)?)),
            None => Ok(None),
        }
    }

    /// The next argument, validated as JSON and returned verbatim.
    fn req_json(&mut self, name: &str) -> Result<String> {
        let raw = self.req_str(name)?;
        serde_json::from_str::<Value>(&raw)
            .map_err(|e| self.malformed(format!("{name} is not JSON: {e}")))?;
        Ok(raw)
    }

    /// The next argument, parsed as a JSON array of strings.
    fn req_str_array(&mut self, name: &str) -> Result<Vec<String>> {
        let raw = self.req_str(name)?;
        serde_json::from_str::<Vec<String>>(&raw)
            .map_err(|e| self.malformed(format!("{name} is not a JSON array of strings: {e}")))
    }

    /// Reject trailing arguments.
    fn done(&self) -> Result<()> {
        if self.pos < self.argv.len() {
            return Err(self.malformed(format!(
                "unexpected trailing arguments: {:?}",
                &self.argv[self.pos..]
            )));
        }
        Ok(())
    }
}

fn jobs_to_values(jobs: Vec<crate::job::Job>) -> Result<Value> {
    let mut values = Vec::with_capacity(jobs.len());
    for job in &jobs {
        values.push(
            serde_json::to_value(job).map_err(|e| anyhow::anyhow!("serializing job: {e}"))?,
        );
    }
    Ok(Value::Array(values))
}

fn stats_to_value(stats: &crate::stats::QueueDayStats) -> Value {
    json!({
        "failed": stats.failed,
        "failures": stats.failures,
        "retries": stats.retries,
        "wait": { "count": stats.wait.count, "mean": stats.wait.mean, "std": stats.wait.std() },
        "run": { "count": stats.run.count, "mean": stats.run.mean, "std": stats.run.std() },
    })
}

/// Execute one command against the engine.
pub fn dispatch<S: Store>(
    engine: &mut Engine<S>,
    command: &str,
    now: Timestamp,
    argv: &[String],
) -> Result<Value> {
    match command {
        "put" => {
            let mut args = Args::new("put", argv);
            let worker = args.req_str("worker")?;
            let queue = args.req_str("queue")?;
            let jid = args.req_str("jid")?;
            let klass = args.req_str("klass")?;
            let data = args.req_json("data")?;
            let delay = args.req_i64("delay")?;
            let mut opts = PutOptions::default();
            while let Some(key) = args.opt_str() {
                match key.as_str() {
                    "priority" => opts.priority = Some(args.req_i64("priority")?),
                    "tags" => opts.tags = Some(args.req_str_array("tags")?),
                    "retries" => opts.retries = Some(args.req_i64("retries")?),
                    "depends" => opts.depends = Some(args.req_str_array("depends")?),
                    "resources" => opts.resources = Some(args.req_str_array("resources")?),
                    "replace" => opts.replace = Some(args.req_i64("replace")? != 0),
                    "interval" => opts.interval = Some(args.req_i64("interval")?),
                    other => return Err(args.malformed(format!("unknown option {other}"))),
                }
            }
            let worker = (!worker.is_empty()).then_some(worker.as_str());
            match engine.put(now, worker, &queue, &jid, &klass, &data, delay, opts)? {
                PutOutcome::Queued(jid) => Ok(Value::String(jid)),
                PutOutcome::NotReplaced => Ok(Value::from(NOT_REPLACED)),
            }
        }
        "pop" => {
            let mut args = Args::new("pop", argv);
            let queue = args.req_str("queue")?;
            let worker = args.req_str("worker")?;
            let count = args.req_usize("count")?;
            args.done()?;
            jobs_to_values(engine.pop(now, &queue, &worker, count)?)
        }
        "peek" => {
            let mut args = Args::new("peek", argv);
            let queue = args.req_str("queue")?;
            let count = args.req_usize("count")?;
            args.done()?;
            jobs_to_values(engine.peek(now, &queue, count)?)
        }
        "complete" => {
            let mut args = Args::new("complete", argv);
            let jid = args.req_str("jid")?;
            let worker = args.req_str("worker")?;
            let queue = args.req_str("queue")?;
            let result_data = args.req_json("data")?;
            let mut opts = CompleteOptions::default();
            while let Some(key) = args.opt_str() {
                match key.as_str() {
                    "next" => opts.next = Some(args.req_str("next")?),
                    "delay" => opts.delay = args.req_i64("delay")?,
                    "depends" => opts.depends = Some(args.req_str_array("depends")?),
                    other => return Err(args.malformed(format!("unknown option {other}"))),
                }
            }
            let outcome = engine.complete(now, &jid, &worker, &queue, &result_data, opts)?;
            Ok(Value::String(outcome.as_str().to_string()))
        }
        "fail" => {
            let mut args = Args::new("fail", argv);
            let jid = args.req_str("jid")?;
            let worker = args.req_str("worker")?;
            let group = args.req_str("group")?;
            let message = args.req_str("message")?;
            let data = match args.opt_str() {
                Some(raw) => {
                    serde_json::from_str::<Value>(&raw)
                        .map_err(|e| args.malformed(format!("data is not JSON: {e}")))?;
                    Some(raw)
                }
                None => None,
            };
            args.done()?;
            let jid = engine.fail(now, &jid, &worker, &group, &message, data.as_deref())?;
            Ok(Value::String(jid))
        }
        "retry" => {
            let mut args = Args::new("retry", argv);
            let jid = args.req_str("jid")?;
            let queue = args.req_str("queue")?;
            let worker = args.req_str("worker")?;
            let delay = match args.opt_str() {
                Some(raw) => raw
                    .parse::<i64>()
                    .map_err(|_| args.malformed(format!("delay must be a number, got {raw:?}")))?,
                None => 0,
            };
            let group_message = match args.opt_str() {
                Some(group) => Some((group, args.req_str("message")?)),
                None => None,
            };
            args.done()?;
            let remaining = engine.retry(now, &jid, &queue, &worker, delay, group_message)?;
            Ok(Value::from(remaining))
        }
        "heartbeat" => {
            let mut args = Args::new("heartbeat", argv);
            let jid = args.req_str("jid")?;
            let worker = args.req_str("worker")?;
            let data = match args.opt_str() {
                Some(raw) => {
                    serde_json::from_str::<Value>(&raw)
                        .map_err(|e| args.malformed(format!("data is not JSON: {e}")))?;
                    Some(raw)
                }
                None => None,
            };
            args.done()?;
            let expires = engine.heartbeat(now, &jid, &worker, data.as_deref())?;
            Ok(Value::from(expires))
        }
        "cancel" => {
            let mut args = Args::new("cancel", argv);
            let jid = args.req_str("jid")?;
            args.done()?;
            engine.cancel(now, &jid)?;
            Ok(Value::String(jid))
        }
        "priority" => {
            let mut args = Args::new("priority", argv);
            let jid = args.req_str("jid")?;
            let priority = args.req_i64("priority")?;
            args.done()?;
            engine.priority(now, &jid, priority)?;
            Ok(Value::String(jid))
        }
        "track" => {
            let mut args = Args::new("track", argv);
            match args.opt_str() {
                Some(jid) => {
                    args.done()?;
                    engine.track(now, &jid)?;
                    Ok(Value::String(jid))
                }
                None => jobs_to_values(engine.tracked(now)?),
            }
        }
        "untrack" => {
            let mut args = Args::new("untrack", argv);
            let jid = args.req_str("jid")?;
            args.done()?;
            engine.untrack(now, &jid)?;
            Ok(Value::String(jid))
        }
        "tag" => {
            let mut args = Args::new("tag", argv);
            let sub = args.req_str("subcommand")?;
            match sub.as_str() {
                "add" | "remove" => {
                    let jid = args.req_str("jid")?;
                    let mut tags = Vec::new();
                    while let Some(tag) = args.opt_str() {
                        tags.push(tag);
                    }
                    let result = if sub == "add" {
                        engine.tag_add(now, &jid, &tags)?
                    } else {
                        engine.tag_remove(now, &jid, &tags)?
                    };
                    Ok(json!(result))
                }
                "get" => {
                    let tag = args.req_str("tag")?;
                    let offset = args.opt_usize("offset")?.unwrap_or(0);
                    let count = args.opt_usize("count")?.unwrap_or(25);
                    args.done()?;
                    Ok(json!(engine.tag_get(now, &tag, offset, count)?))
                }
                "top" => {
                    let offset = args.opt_usize("offset")?.unwrap_or(0);
                    let count = args.opt_usize("count")?.unwrap_or(25);
                    args.done()?;
                    Ok(json!(engine.tag_top(now, offset, count)?))
                }
                other => Err(args.malformed(format!("unknown subcommand {other}"))),
            }
        }
        "depends" => {
            let mut args = Args::new("depends", argv);
            let jid = args.req_str("jid")?;
            let direction = args.req_str("direction")?;
            let mut rest = Vec::new();
            while let Some(arg) = args.opt_str() {
                rest.push(arg);
            }
            match direction.as_str() {
                "on" => {
                    if rest.is_empty() {
                        return Err(args.malformed("missing dependencies"));
                    }
                    engine.depends_add(now, &jid, &rest)?;
                }
                "off" => {
                    if rest.first().map(String::as_str) == Some("all") && rest.len() == 1 {
                        engine.depends_remove(now, &jid, None)?;
                    } else if rest.is_empty() {
                        return Err(args.malformed("missing dependencies"));
                    } else {
                        engine.depends_remove(now, &jid, Some(&rest))?;
                    }
                }
                other => return Err(args.malformed(format!("direction must be on or off, got {other}"))),
            }
            Ok(Value::String(jid))
        }
        "pause" => {
            let mut args = Args::new("pause", argv);
            let queue = args.req_str("queue")?;
            args.done()?;
            engine.pause(now, &queue)?;
            Ok(Value::String(queue))
        }
        "unpause" => {
            let mut args = Args::new("unpause", argv);
            let queue = args.req_str("queue")?;
            args.done()?;
            engine.unpause(now, &queue)?;
            Ok(Value::String(queue))
        }
        "paused" => {
            let mut args = Args::new("paused", argv);
            let queue = args.req_str("queue")?;
            args.done()?;
            Ok(Value::Bool(engine.paused(now, &queue)?))
        }
        "queues" => {
            let mut args = Args::new("queues", argv);
            match args.opt_str() {
                Some(name) => {
                    args.done()?;
                    let counts = engine.queue_counts(now, &name)?;
                    serde_json::to_value(counts).map_err(|e| anyhow::anyhow!("{e}").into())
                }
                None => {
                    let counts = engine.queues(now)?;
                    serde_json::to_value(counts).map_err(|e| anyhow::anyhow!("{e}").into())
                }
            }
        }
        "jobs" => {
            let mut args = Args::new("jobs", argv);
            let state = args.req_str("state")?;
            if state == "complete" {
                let offset = args.opt_usize("offset")?.unwrap_or(0);
                let count = args.opt_usize("count")?.unwrap_or(25);
                args.done()?;
                return Ok(json!(engine.jobs_complete(now, offset, count)?));
            }
            let state = match state.as_str() {
                "running" => QueueJobsState::Running,
                "stalled" => QueueJobsState::Stalled,
                "scheduled" => QueueJobsState::Scheduled,
                "depends" => QueueJobsState::Depends,
                "recurring" => QueueJobsState::Recurring,
                other => return Err(args.malformed(format!("unknown state {other}"))),
            };
            let queue = args.req_str("queue")?;
            let offset = args.opt_usize("offset")?.unwrap_or(0);
            let count = args.opt_usize("count")?.unwrap_or(25);
            args.done()?;
            Ok(json!(engine.jobs_queue(now, state, &queue, offset, count)?))
        }
        "get" => {
            let mut args = Args::new("get", argv);
            let jid = args.req_str("jid")?;
            args.done()?;
            engine.job_record(now, &jid)
        }
        "workers" => {
            let mut args = Args::new("workers", argv);
            match args.opt_str() {
                Some(worker) => {
                    args.done()?;
                    let jobs = engine.worker_jobs(now, &worker)?;
                    serde_json::to_value(jobs).map_err(|e| anyhow::anyhow!("{e}").into())
                }
                None => {
                    let workers = engine.workers(now)?;
                    serde_json::to_value(workers).map_err(|e| anyhow::anyhow!("{e}").into())
                }
            }
        }
        "recur" => {
            let mut args = Args::new("recur", argv);
            let queue = args.req_str("queue")?;
            let jid = args.req_str("jid")?;
            let klass = args.req_str("klass")?;
            let data = args.req_json("data")?;
            let spec = args.req_str("spec")?;
            if spec != "interval" {
                return Err(args.malformed(format!("unknown recurrence spec {spec}")));
            }
            let interval = args.req_i64("interval")?;
            let offset = args.req_i64("offset")?;
            let mut opts = RecurOptions::default();
            while let Some(key) = args.opt_str() {
                match key.as_str() {
                    "priority" => opts.priority = Some(args.req_i64("priority")?),
                    "tags" => opts.tags = Some(args.req_str_array("tags")?),
                    "retries" => opts.retries = Some(args.req_i64("retries")?),
                    "resources" => opts.resources = Some(args.req_str_array("resources")?),
                    "backlog" => opts.backlog = Some(args.req_i64("backlog")?),
                    other => return Err(args.malformed(format!("unknown option {other}"))),
                }
            }
            let jid = engine.recur(now, &queue, &jid, &klass, &data, interval, offset, opts)?;
            Ok(Value::String(jid))
        }
        "recur.update" => {
            let mut args = Args::new("recur.update", argv);
            let jid = args.req_str("jid")?;
            let mut updates = Vec::new();
            while let Some(field) = args.opt_str() {
                updates.push((field, args.req_str("value")?));
            }
            engine.recur_update(now, &jid, &updates)?;
            Ok(Value::String(jid))
        }
        "unrecur" => {
            let mut args = Args::new("unrecur", argv);
            let jid = args.req_str("jid")?;
            args.done()?;
            engine.unrecur(now, &jid)?;
            Ok(Value::String(jid))
        }
        "resource.set" => {
            let mut args = Args::new("resource.set", argv);
            let name = args.req_str("name")?;
            let max = args.req_i64("max")?;
            args.done()?;
            Ok(Value::String(engine.resource_set(now, &name, max)?))
        }
        "resource.unset" => {
            let mut args = Args::new("resource.unset", argv);
            let name = args.req_str("name")?;
            args.done()?;
            engine.resource_unset(now, &name)?;
            Ok(Value::String(name))
        }
        "resource.get" => {
            let mut args = Args::new("resource.get", argv);
            let name = args.req_str("name")?;
            args.done()?;
            let resource = engine.resource_get(now, &name)?;
            serde_json::to_value(resource).map_err(|e| anyhow::anyhow!("{e}").into())
        }
        "resource.data" => {
            let mut args = Args::new("resource.data", argv);
            let name = args.req_str("name")?;
            args.done()?;
            match engine.resource_data(now, &name)? {
                Some(resource) => {
                    serde_json::to_value(resource).map_err(|e| anyhow::anyhow!("{e}").into())
                }
                None => Ok(Value::Null),
            }
        }
        "resource.exists" => {
            let mut args = Args::new("resource.exists", argv);
            let name = args.req_str("name")?;
            args.done()?;
            Ok(Value::Bool(engine.resource_exists(now, &name)?))
        }
        "resource.locks" => {
            let mut args = Args::new("resource.locks", argv);
            let name = args.req_str("name")?;
            args.done()?;
            Ok(json!(engine.resource_locks(now, &name)?))
        }
        "resource.pending" => {
            let mut args = Args::new("resource.pending", argv);
            let name = args.req_str("name")?;
            args.done()?;
            Ok(json!(engine.resource_pending(now, &name)?))
        }
        "resource.lock_count" => {
            let mut args = Args::new("resource.lock_count", argv);
            let name = args.req_str("name")?;
            args.done()?;
            Ok(Value::from(engine.resource_lock_count(now, &name)?))
        }
        "resource.pending_count" => {
            let mut args = Args::new("resource.pending_count", argv);
            let name = args.req_str("name")?;
            args.done()?;
            Ok(Value::from(engine.resource_pending_count(now, &name)?))
        }
        "config.set" => {
            let mut args = Args::new("config.set", argv);
            let key = args.req_str("key")?;
            let value = args.req_i64("value")?;
            args.done()?;
            engine.config_set(now, &key, value)?;
            Ok(Value::String(key))
        }
        "config.get" => {
            let mut args = Args::new("config.get", argv);
            match args.opt_str() {
                Some(key) => {
                    args.done()?;
                    Ok(engine
                        .config_get(now, &key)?
                        .map(Value::from)
                        .unwrap_or(Value::Null))
                }
                None => {
                    let mut map = serde_json::Map::new();
                    for (key, value) in engine.config_all(now)? {
                        map.insert(key, Value::from(value));
                    }
                    Ok(Value::Object(map))
                }
            }
        }
        "stats" => {
            let mut args = Args::new("stats", argv);
            let queue = args.req_str("queue")?;
            args.done()?;
            Ok(stats_to_value(&engine.queue_stats(now, &queue)?))
        }
        other => Err(Error::NotFound {
            kind: "command",
            id: other.to_string(),
        }),
    }
}

