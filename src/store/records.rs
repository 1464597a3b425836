/// Cache record schema
///
/// One invocation is stored as:
///
/// ```text
/// annot:<uuid>  annot:post<i>    post:<edit digest>
///               annot:quest      quest:<quest digest>
///               annot:timestamp  "2024-05-01T12:00:00.123Z"
///               annot:resp       resp:<uuid>
///               annot:call_hash  "<digest of effective args>"
///               annot:run_by     "<user>"
///               annot:git_commit "<sha>"
///               annot:git_branch "<branch>"
///               annot:dep        dep:<uuid>       (one per dependency)
/// dep:<uuid>    dep:quest quest:<digest>, dep:index <position>
/// post:<digest> post:id, post:timestamp, post:content
/// quest:<digest> quest:name, quest:major, quest:minor, quest:hash
/// ```
///
/// Each dependency occurrence gets its own entry, so repeated dependencies and
/// their order survive a round trip. A stored invocation is only reused while
/// its own quest digest and every dependency digest are among the currently
/// recognized definitions.
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::process::Command;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};
use uuid::Uuid;

use super::pattern::{var, Exclusion, Query, Term, Triple};
use super::TripleStore;
use crate::edit::{format_timestamp, parse_timestamp, Edit};
use crate::error::{Error, Result};
use crate::output::{Output, Response};
use crate::quest::Quest;

fn p(prefix: &str, local: &str) -> Term {
    Term::iri(prefix, local)
}

/// Everything written for one executed invocation
pub struct InvocationRecord<'a> {
    pub edits: &'a [Arc<Edit>],
    pub quest: &'a Quest,
    pub response: &'a Response,
    pub call_hash: &'a str,
    pub dependencies: &'a [Quest],
}

/// A reusable stored invocation
#[derive(Debug, Clone)]
pub struct CachedHit {
    pub annotation: Term,
    pub quest: Quest,
    pub dependencies: Vec<Quest>,
    pub response: Response,
}

fn edit_triples(edit: &Edit) -> Result<(Term, Vec<Triple>)> {
    let subject = Term::iri("post", edit.digest()?);
    let triples = vec![
        Triple::new(subject.clone(), p("post", "id"), Term::str(edit.id())),
        Triple::new(
            subject.clone(),
            p("post", "timestamp"),
            Term::str(format_timestamp(&edit.timestamp())),
        ),
        Triple::new(subject.clone(), p("post", "content"), Term::str(edit.content()?)),
    ];
    Ok((subject, triples))
}

/// Triples describing a quest; the version must be concrete
pub fn quest_triples(quest: &Quest) -> Vec<Triple> {
    let subject = Term::iri("quest", &quest.digest);
    let mut triples = vec![
        Triple::new(subject.clone(), p("quest", "name"), Term::str(quest.name.clone())),
        Triple::new(subject.clone(), p("quest", "hash"), Term::str(quest.digest.clone())),
    ];
    if let Some(major) = quest.major {
        triples.push(Triple::new(subject.clone(), p("quest", "major"), Term::Int(major as i64)));
    }
    if let Some(minor) = quest.minor {
        triples.push(Triple::new(subject, p("quest", "minor"), Term::Int(minor as i64)));
    }
    triples
}

/// Build the full batch for one invocation
pub fn invocation_triples(record: &InvocationRecord<'_>) -> Result<Vec<Triple>> {
    let subject = Term::iri("annot", Uuid::new_v4());
    let response_id = Uuid::new_v4();
    let mut triples = Vec::new();

    for (i, edit) in record.edits.iter().enumerate() {
        let (edit_subject, edit_triples) = edit_triples(edit)?;
        triples.extend(edit_triples);
        triples.push(Triple::new(subject.clone(), p("annot", &format!("post{}", i)), edit_subject));
    }

    triples.extend(quest_triples(record.quest));
    for dependency in record.dependencies {
        triples.extend(quest_triples(dependency));
    }
    triples.extend(record.response.output.to_triples(&response_id));

    let git = git_info();
    let annot = |key: &str, object: Term| Triple::new(subject.clone(), p("annot", key), object);
    triples.push(annot("quest", Term::iri("quest", &record.quest.digest)));
    triples.push(annot(
        "timestamp",
        Term::str(format_timestamp(&record.response.timestamp)),
    ));
    triples.push(annot("resp", Term::iri("resp", response_id)));
    triples.push(annot("call_hash", Term::str(record.call_hash)));
    triples.push(annot("run_by", Term::str(run_by())));
    triples.push(annot("git_commit", Term::str(git.commit.clone())));
    triples.push(annot("git_branch", Term::str(git.branch.clone())));
    for (index, dependency) in record.dependencies.iter().enumerate() {
        let entry = Term::iri("dep", Uuid::new_v4());
        triples.push(annot("dep", entry.clone()));
        triples.push(Triple::new(
            entry.clone(),
            p("dep", "quest"),
            Term::iri("quest", &dependency.digest),
        ));
        triples.push(Triple::new(entry, p("dep", "index"), Term::Int(index as i64)));
    }

    Ok(triples)
}

/// Persist one invocation in a single batch insert
pub fn write_invocation(store: &dyn TripleStore, record: &InvocationRecord<'_>) -> Result<()> {
    let triples = invocation_triples(record)?;
    debug!(
        quest = %record.quest,
        call_hash = %record.call_hash,
        entry_count = triples.len(),
        "writing cache record"
    );
    store.insert(&triples)
}

fn sorted_terms(digests: &HashSet<String>) -> Vec<Term> {
    let mut digests: Vec<&String> = digests.iter().collect();
    digests.sort();
    digests.into_iter().map(|d| Term::str(d.clone())).collect()
}

/// Stored invocations with this call hash whose quest and dependencies are
/// all still recognized
pub fn lookup_query(
    call_hash: &str,
    name: &str,
    major: Option<u32>,
    minor: Option<u32>,
    recognized: &HashSet<String>,
) -> Query {
    let recognized = sorted_terms(recognized);

    let mut query = Query::select(&["annot", "major", "minor", "resp", "time", "qhash"])
        .pattern(var("annot"), p("annot", "call_hash"), Term::str(call_hash))
        .pattern(var("annot"), p("annot", "resp"), var("resp"))
        .pattern(var("annot"), p("annot", "timestamp"), var("time"))
        .pattern(var("annot"), p("annot", "quest"), var("quest"))
        .pattern(var("quest"), p("quest", "name"), Term::str(name))
        .pattern(var("quest"), p("quest", "major"), var("major"))
        .pattern(var("quest"), p("quest", "minor"), var("minor"))
        .pattern(var("quest"), p("quest", "hash"), var("qhash"));

    if let Some(major) = major {
        query = query.values("major", vec![Term::Int(major as i64)]);
    }
    if let Some(minor) = minor {
        query = query.values("minor", vec![Term::Int(minor as i64)]);
    }

    query.values("qhash", recognized.clone()).exclude(
        Exclusion::new("qdep_hash", recognized)
            .pattern(var("annot"), p("annot", "dep"), var("dep_entry"))
            .pattern(var("dep_entry"), p("dep", "quest"), var("quest_dep"))
            .pattern(var("quest_dep"), p("quest", "hash"), var("qdep_hash")),
    )
}

fn int_binding(binding: &super::Bindings, name: &str) -> Result<u32> {
    binding
        .get(name)
        .and_then(Term::as_int)
        .and_then(|i| u32::try_from(i).ok())
        .ok_or_else(|| Error::incompatible(format!("'{}' is not a version number", name)))
}

fn string_binding(binding: &super::Bindings, name: &str) -> Result<String> {
    binding
        .get(name)
        .map(Term::lexical)
        .ok_or_else(|| Error::incompatible(format!("'{}' is unbound", name)))
}

/// Find the latest valid stored invocation, with its dependencies and response
pub fn find_cached(
    store: &dyn TripleStore,
    quest: &Quest,
    call_hash: &str,
    recognized: &HashSet<String>,
) -> Result<Option<CachedHit>> {
    let query = lookup_query(call_hash, &quest.name, quest.major, quest.minor, recognized);
    let bindings = store.query(&query)?;

    let mut candidates = Vec::with_capacity(bindings.len());
    for binding in &bindings {
        let major = int_binding(binding, "major")?;
        let minor = int_binding(binding, "minor")?;
        let time = parse_timestamp(&string_binding(binding, "time")?)
            .map_err(|e| Error::incompatible(e.to_string()))?;
        candidates.push(((major, minor, time), binding));
    }

    if candidates.len() > 1 {
        warn!(
            quest = %quest.name,
            call_hash = %call_hash,
            entry_count = candidates.len(),
            "multiple cached entries, using the latest version and time"
        );
    }

    let Some(((major, minor, time), binding)) = candidates.into_iter().max_by_key(|(key, _)| *key) else {
        return Ok(None);
    };

    let annotation = binding
        .get("annot")
        .cloned()
        .ok_or_else(|| Error::incompatible("'annot' is unbound"))?;
    let response_term = binding
        .get("resp")
        .cloned()
        .ok_or_else(|| Error::incompatible("'resp' is unbound"))?;
    let digest = string_binding(binding, "qhash")?;

    let dependencies = fetch_dependencies(store, &annotation)?;
    let output = fetch_output(store, &response_term)?;

    Ok(Some(CachedHit {
        annotation,
        quest: Quest::new(&quest.name, Some(major), Some(minor), digest),
        dependencies,
        response: Response {
            output,
            timestamp: time,
        },
    }))
}

/// Recorded dependencies of a stored invocation, in call order with repeats
pub fn fetch_dependencies(store: &dyn TripleStore, annotation: &Term) -> Result<Vec<Quest>> {
    let query = Query::select(&["index", "name", "major", "minor", "hash"])
        .pattern(annotation.clone(), p("annot", "dep"), var("entry"))
        .pattern(var("entry"), p("dep", "index"), var("index"))
        .pattern(var("entry"), p("dep", "quest"), var("dep"))
        .pattern(var("dep"), p("quest", "name"), var("name"))
        .pattern(var("dep"), p("quest", "major"), var("major"))
        .pattern(var("dep"), p("quest", "minor"), var("minor"))
        .pattern(var("dep"), p("quest", "hash"), var("hash"));

    let mut dependencies = store
        .query(&query)?
        .iter()
        .map(|b| {
            let quest = Quest::new(
                string_binding(b, "name")?,
                Some(int_binding(b, "major")?),
                Some(int_binding(b, "minor")?),
                string_binding(b, "hash")?,
            );
            Ok((int_binding(b, "index")?, quest))
        })
        .collect::<Result<Vec<_>>>()?;

    dependencies.sort_by_key(|(index, _)| *index);
    if dependencies.iter().enumerate().any(|(i, (index, _))| *index as usize != i) {
        return Err(Error::incompatible(format!(
            "dependency positions of {:?} are not contiguous",
            annotation
        )));
    }
    Ok(dependencies.into_iter().map(|(_, quest)| quest).collect())
}

fn properties(store: &dyn TripleStore, subject: &Term, prefix: &str) -> Result<Vec<(String, Term)>> {
    let query = Query::select(&["k", "v"]).pattern(subject.clone(), var("k"), var("v"));
    store
        .query(&query)?
        .into_iter()
        .map(|b| {
            let key = b
                .get("k")
                .and_then(|k| k.local_name(prefix))
                .ok_or_else(|| Error::incompatible(format!("unexpected property on {:?}", subject)))?
                .to_string();
            let value = b
                .get("v")
                .cloned()
                .ok_or_else(|| Error::incompatible("'v' is unbound"))?;
            Ok((key, value))
        })
        .collect()
}

/// Load a stored output
pub fn fetch_output(store: &dyn TripleStore, response: &Term) -> Result<Output> {
    let props = properties(store, response, "resp")?;
    let mut items = Vec::new();
    for (key, value) in &props {
        if key == "item" {
            if value.as_iri().is_none() {
                return Err(Error::incompatible("response item is not an IRI"));
            }
            items.push(properties(store, value, "item")?);
        }
    }
    Output::from_record(&props, &items)
}

/// Latest stored output per post for one quest
///
/// Keyed by the id of the first post of each invocation.
pub fn export(
    store: &dyn TripleStore,
    name: &str,
    major: Option<u32>,
    minor: Option<u32>,
) -> Result<BTreeMap<String, (DateTime<Utc>, Output)>> {
    let mut query = Query::select(&["id", "time", "resp"])
        .pattern(var("quest"), p("quest", "name"), Term::str(name))
        .pattern(var("quest"), p("quest", "major"), var("major"))
        .pattern(var("quest"), p("quest", "minor"), var("minor"))
        .pattern(var("annot"), p("annot", "quest"), var("quest"))
        .pattern(var("annot"), p("annot", "timestamp"), var("time"))
        .pattern(var("annot"), p("annot", "post0"), var("post"))
        .pattern(var("post"), p("post", "id"), var("id"))
        .pattern(var("annot"), p("annot", "resp"), var("resp"));
    if let Some(major) = major {
        query = query.values("major", vec![Term::Int(major as i64)]);
    }
    if let Some(minor) = minor {
        query = query.values("minor", vec![Term::Int(minor as i64)]);
    }

    let mut latest: BTreeMap<String, (DateTime<Utc>, Term)> = BTreeMap::new();
    for binding in store.query(&query)? {
        let id = string_binding(&binding, "id")?;
        let time = parse_timestamp(&string_binding(&binding, "time")?)?;
        let resp = binding
            .get("resp")
            .cloned()
            .ok_or_else(|| Error::incompatible("'resp' is unbound"))?;
        // on equal timestamps the later binding wins
        let newer = latest.get(&id).map(|(t, _)| time >= *t).unwrap_or(true);
        if newer {
            latest.insert(id, (time, resp));
        }
    }

    let mut out = BTreeMap::new();
    for (id, (time, resp)) in latest {
        match fetch_output(store, &resp) {
            Ok(output) => {
                out.insert(id, (time, output));
            }
            Err(Error::IncompatibleCache(reason)) => {
                warn!(post = %id, reason = %reason, "skipping incompatible record");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

struct GitInfo {
    commit: String,
    branch: String,
}

fn git_info() -> &'static GitInfo {
    static GIT: OnceLock<GitInfo> = OnceLock::new();
    GIT.get_or_init(|| GitInfo {
        commit: git(&["rev-parse", "HEAD"]),
        branch: git(&["rev-parse", "--abbrev-ref", "HEAD"]),
    })
}

fn git(args: &[&str]) -> String {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn run_by() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::StaticOutput;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Mutex;

    fn quest(name: &str, minor: u32) -> Quest {
        Quest::new(name, Some(1), Some(minor), format!("{}-{}", name, minor))
    }

    fn write(store: &MemoryStore, quest: &Quest, deps: &[Quest], value: i64) {
        write_at(store, quest, deps, value, Utc::now());
    }

    fn write_at(store: &MemoryStore, quest: &Quest, deps: &[Quest], value: i64, timestamp: DateTime<Utc>) {
        let edits = [Edit::from_text("hello")];
        let response = Response {
            output: Output::Static(StaticOutput { value: json!(value) }),
            timestamp,
        };
        write_invocation(
            store,
            &InvocationRecord {
                edits: &edits,
                quest,
                response: &response,
                call_hash: "call",
                dependencies: deps,
            },
        )
        .unwrap();
    }

    fn recognized(quests: &[&Quest]) -> HashSet<String> {
        quests.iter().map(|q| q.digest.clone()).collect()
    }

    #[test]
    fn test_written_record_is_found() {
        let store = MemoryStore::new();
        let a = quest("a", 0);
        let b = quest("b", 0);
        let c = quest("c", 0);
        write(&store, &a, &[b.clone(), c.clone(), b.clone()], 5);

        let hit = find_cached(&store, &a, "call", &recognized(&[&a, &b, &c]))
            .unwrap()
            .unwrap();
        assert_eq!(hit.quest, a);
        assert_eq!(hit.dependencies, vec![b.clone(), c, b]);
        assert_eq!(hit.response.value().unwrap(), json!(5));
    }

    #[test]
    fn test_unrecognized_dependency_excludes_record() {
        let store = MemoryStore::new();
        let a = quest("a", 0);
        let b = quest("b", 0);
        write(&store, &a, &[b.clone()], 5);

        assert!(find_cached(&store, &a, "call", &recognized(&[&a])).unwrap().is_none());
    }

    #[test]
    fn test_latest_version_wins() {
        let store = MemoryStore::new();
        let old = quest("a", 0);
        let new = quest("a", 3);
        write(&store, &old, &[], 1);
        write(&store, &new, &[], 2);

        let any = Quest::new("a", None, None, "");
        let hit = find_cached(&store, &any, "call", &recognized(&[&old, &new]))
            .unwrap()
            .unwrap();
        assert_eq!(hit.quest, new);

        let pinned = Quest::new("a", Some(1), Some(0), "");
        let hit = find_cached(&store, &pinned, "call", &recognized(&[&old, &new]))
            .unwrap()
            .unwrap();
        assert_eq!(hit.response.value().unwrap(), json!(1));
    }

    /// Log output collected by a scoped subscriber
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_same_version_latest_time_wins() {
        let store = MemoryStore::new();
        let a = quest("a", 0);
        let earlier = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        let later = parse_timestamp("2024-06-01T00:00:00Z").unwrap();
        // written out of order so insertion order cannot decide
        write_at(&store, &a, &[], 2, later);
        write_at(&store, &a, &[], 1, earlier);

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let hit = tracing::subscriber::with_default(subscriber, || {
            find_cached(&store, &a, "call", &recognized(&[&a])).unwrap().unwrap()
        });

        assert_eq!(hit.response.timestamp, later);
        assert_eq!(hit.response.value().unwrap(), json!(2));

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("multiple cached entries"));
        assert!(logs.contains("entry_count=2"));
    }

    #[test]
    fn test_other_call_hash_misses() {
        let store = MemoryStore::new();
        let a = quest("a", 0);
        write(&store, &a, &[], 1);
        assert!(find_cached(&store, &a, "other", &recognized(&[&a])).unwrap().is_none());
    }

    #[test]
    fn test_export_latest_per_post() {
        let store = MemoryStore::new();
        let a = quest("a", 0);
        write(&store, &a, &[], 1);
        write(&store, &a, &[], 2);

        let exported = export(&store, "a", None, None).unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported["0"].1.value().unwrap(), json!(2));
    }
}
