use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::pattern::{compact_iri, to_sparql, to_sparql_insert, Bindings, Query, Term, Triple};
use super::TripleStore;
use crate::error::{Error, Result};
use crate::hashing::hash_by_lines;

const QUERY_ENDPOINT: &str = "query";
const UPDATE_ENDPOINT: &str = "update";
const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";

/// SPARQL 1.1 endpoint (e.g. an Apache Jena Fuseki dataset)
///
/// Queries go to `<dataset>/query` and must answer 200; updates go to
/// `<dataset>/update` and must answer 204. Anything else is
/// [`Error::Store`]. No request is retried.
pub struct SparqlStore {
    client: Client,
    dataset: String,
    dump_dir: Option<PathBuf>,
}

#[derive(Deserialize)]
struct SparqlResults {
    results: SparqlBindings,
}

#[derive(Deserialize)]
struct SparqlBindings {
    bindings: Vec<HashMap<String, SparqlValue>>,
}

#[derive(Deserialize)]
struct SparqlValue {
    #[serde(rename = "type")]
    kind: String,
    value: String,
    datatype: Option<String>,
}

impl SparqlValue {
    fn into_term(self) -> Term {
        match self.kind.as_str() {
            "uri" => Term::Iri(compact_iri(&self.value)),
            _ if self.datatype.as_deref() == Some(XSD_INTEGER) => match self.value.parse() {
                Ok(i) => Term::Int(i),
                Err(_) => Term::Str(self.value),
            },
            _ => Term::Str(self.value),
        }
    }
}

impl SparqlStore {
    pub fn new(dataset: &str) -> Self {
        Self {
            client: Client::new(),
            dataset: dataset.trim_end_matches('/').to_string(),
            dump_dir: None,
        }
    }

    /// Also write every update request to `dir`, named by its digest
    pub fn with_dump_dir(mut self, dir: PathBuf) -> Self {
        self.dump_dir = Some(dir);
        self
    }

    fn dump(&self, command: &str) -> Result<()> {
        let Some(dir) = &self.dump_dir else {
            return Ok(());
        };
        fs::create_dir_all(dir)?;
        let path = dir.join(hash_by_lines(&[command]));
        fs::write(&path, command)?;
        debug!(path = %path.display(), "dumped update request");
        Ok(())
    }
}

impl TripleStore for SparqlStore {
    fn insert(&self, triples: &[Triple]) -> Result<()> {
        if triples.is_empty() {
            return Ok(());
        }
        let command = to_sparql_insert(triples);
        self.dump(&command)?;

        let response = self
            .client
            .post(format!("{}/{}", self.dataset, UPDATE_ENDPOINT))
            .header("Content-Type", "application/sparql-update")
            .body(command.clone())
            .send()?;

        if response.status() != StatusCode::NO_CONTENT {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            warn!(status = %status, "sparql update failed");
            return Err(Error::store(format!(
                "update returned {}: {}\nrequest:\n{}",
                status, body, command
            )));
        }
        debug!(entry_count = triples.len(), "inserted triples");
        Ok(())
    }

    fn query(&self, query: &Query) -> Result<Vec<Bindings>> {
        let command = to_sparql(query);
        let response = self
            .client
            .post(format!("{}/{}", self.dataset, QUERY_ENDPOINT))
            .header("Content-Type", "application/sparql-query")
            .header("Accept", "application/sparql-results+json")
            .body(command.clone())
            .send()?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(Error::store(format!(
                "query returned {}: {}\nrequest:\n{}",
                status, body, command
            )));
        }

        let results: SparqlResults = response
            .json()
            .map_err(|e| Error::store(format!("malformed query response: {}", e)))?;
        Ok(parse_bindings(results))
    }

    fn location(&self) -> String {
        self.dataset.clone()
    }
}

fn parse_bindings(results: SparqlResults) -> Vec<Bindings> {
    results
        .results
        .bindings
        .into_iter()
        .map(|binding| {
            binding
                .into_iter()
                .map(|(name, value)| (name, value.into_term()))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::pattern::var;
    use serde_json::json;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use tempfile::TempDir;

    /// Answer `requests` HTTP requests with a fixed status, returning the base URL
    fn serve(status: &'static str, requests: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/annot", listener.local_addr().unwrap());
        thread::spawn(move || {
            for stream in listener.incoming().take(requests) {
                let mut stream = stream.unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut length = 0;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if line.trim_end().is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            length = value.trim().parse().unwrap();
                        }
                    }
                }
                let mut body = vec![0; length];
                reader.read_exact(&mut body).unwrap();
                write!(
                    stream,
                    "HTTP/1.1 {}\r\nContent-Length: 4\r\nConnection: close\r\n\r\nboom",
                    status
                )
                .unwrap();
            }
        });
        url
    }

    #[test]
    fn test_failed_update_is_store_error() {
        let store = SparqlStore::new(&serve("500 Internal Server Error", 1));
        let triple = Triple::new(Term::iri("quest", "q"), Term::iri("quest", "name"), Term::str("q"));
        match store.insert(&[triple]) {
            Err(Error::Store(msg)) => assert!(msg.contains("500")),
            other => panic!("expected a store error, got {:?}", other),
        }
    }

    #[test]
    fn test_update_must_answer_no_content() {
        // 200 is not enough for an update
        let store = SparqlStore::new(&serve("200 OK", 1));
        let triple = Triple::new(Term::iri("quest", "q"), Term::iri("quest", "name"), Term::str("q"));
        assert!(matches!(store.insert(&[triple]), Err(Error::Store(_))));
    }

    #[test]
    fn test_failed_query_is_store_error() {
        let store = SparqlStore::new(&serve("500 Internal Server Error", 1));
        let query = Query::select(&["s"]).pattern(var("s"), Term::iri("quest", "name"), Term::str("q"));
        match store.query(&query) {
            Err(Error::Store(msg)) => assert!(msg.contains("500")),
            other => panic!("expected a store error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_bindings() {
        let results: SparqlResults = serde_json::from_value(json!({
            "head": {"vars": ["annot", "major", "time"]},
            "results": {"bindings": [{
                "annot": {"type": "uri", "value": "urn:annot:annotation#abc"},
                "major": {"type": "literal", "datatype": XSD_INTEGER, "value": "2"},
                "time": {"type": "literal", "value": "2024-01-01T00:00:00Z"}
            }]}
        }))
        .unwrap();

        let bindings = parse_bindings(results);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0]["annot"], Term::Iri("annot:abc".into()));
        assert_eq!(bindings[0]["major"], Term::Int(2));
        assert_eq!(bindings[0]["time"], Term::str("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_dump_dir() {
        let temp = TempDir::new().unwrap();
        let store = SparqlStore::new("http://localhost:3030/annot/").with_dump_dir(temp.path().join("dump"));
        store.dump("INSERT DATA { }").unwrap();
        assert_eq!(fs::read_dir(temp.path().join("dump")).unwrap().count(), 1);
        assert_eq!(store.location(), "http://localhost:3030/annot");
    }
}
