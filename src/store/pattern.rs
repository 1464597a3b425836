/// Triples, graph patterns and a basic-graph-pattern evaluator
///
/// The engine talks to every backing store through the same small query
/// model: a conjunction of triple patterns, optional `VALUES` restrictions,
/// and `FILTER NOT EXISTS { ... FILTER(?v NOT IN (...)) }` exclusions. Local
/// stores evaluate it with [`evaluate`]; the SPARQL store renders it with
/// [`to_sparql`].
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Namespace prefixes shared by every record the engine writes
pub const PREFIXES: &[(&str, &str)] = &[
    ("post", "urn:annot:post#"),
    ("annot", "urn:annot:annotation#"),
    ("quest", "urn:annot:question#"),
    ("resp", "urn:annot:response#"),
    ("item", "urn:annot:response_item#"),
    ("dep", "urn:annot:dependency#"),
];

/// An RDF term
///
/// IRIs are kept in prefixed form (`annot:1234`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    Iri(String),
    Str(String),
    Int(i64),
}

impl Term {
    pub fn iri(prefix: &str, local: impl fmt::Display) -> Self {
        Term::Iri(format!("{}:{}", prefix, local))
    }

    pub fn str(s: impl Into<String>) -> Self {
        Term::Str(s.into())
    }

    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Term::Int(i) => Some(*i),
            Term::Str(s) => s.parse().ok(),
            Term::Iri(_) => None,
        }
    }

    /// Lexical form without quoting
    pub fn lexical(&self) -> String {
        match self {
            Term::Iri(s) | Term::Str(s) => s.clone(),
            Term::Int(i) => i.to_string(),
        }
    }

    /// Local part of a prefixed IRI, if it carries the given prefix
    pub fn local_name(&self, prefix: &str) -> Option<&str> {
        self.as_iri()?
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix(':'))
    }

    fn to_sparql(&self) -> String {
        match self {
            Term::Iri(s) => s.clone(),
            Term::Str(s) => serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string()),
            Term::Int(i) => i.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }
}

/// Position of a triple pattern: a variable or a constant term
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Var(String),
    Const(Term),
}

pub fn var(name: &str) -> Node {
    Node::Var(name.to_string())
}

impl From<Term> for Node {
    fn from(term: Term) -> Self {
        Node::Const(term)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriplePattern {
    pub subject: Node,
    pub predicate: Node,
    pub object: Node,
}

/// `FILTER NOT EXISTS { patterns FILTER(?var NOT IN (allowed)) }`
///
/// Removes every solution for which the patterns can be extended so that
/// `var` takes a value outside `allowed`.
#[derive(Debug, Clone, Default)]
pub struct Exclusion {
    pub patterns: Vec<TriplePattern>,
    pub var: String,
    pub allowed: Vec<Term>,
}

impl Exclusion {
    pub fn new(var: &str, allowed: Vec<Term>) -> Self {
        Self {
            patterns: Vec::new(),
            var: var.to_string(),
            allowed,
        }
    }

    pub fn pattern(mut self, s: impl Into<Node>, p: impl Into<Node>, o: impl Into<Node>) -> Self {
        self.patterns.push(TriplePattern {
            subject: s.into(),
            predicate: p.into(),
            object: o.into(),
        });
        self
    }
}

/// Variable bindings of one solution
pub type Bindings = BTreeMap<String, Term>;

#[derive(Debug, Clone, Default)]
pub struct Query {
    pub select: Vec<String>,
    pub patterns: Vec<TriplePattern>,
    pub values: Vec<(String, Vec<Term>)>,
    pub exclusions: Vec<Exclusion>,
}

impl Query {
    /// Start a query projecting the given variables (empty = all)
    pub fn select(vars: &[&str]) -> Self {
        Self {
            select: vars.iter().map(|v| v.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn pattern(mut self, s: impl Into<Node>, p: impl Into<Node>, o: impl Into<Node>) -> Self {
        self.patterns.push(TriplePattern {
            subject: s.into(),
            predicate: p.into(),
            object: o.into(),
        });
        self
    }

    pub fn values(mut self, var: &str, terms: Vec<Term>) -> Self {
        self.values.push((var.to_string(), terms));
        self
    }

    pub fn exclude(mut self, exclusion: Exclusion) -> Self {
        self.exclusions.push(exclusion);
        self
    }
}

/// Evaluate a query against an in-memory slice of triples
pub fn evaluate(triples: &[Triple], query: &Query) -> Vec<Bindings> {
    let mut solutions = match_patterns(triples, &query.patterns, vec![Bindings::new()]);

    for (name, terms) in &query.values {
        let allowed: HashSet<&Term> = terms.iter().collect();
        solutions = solutions
            .into_iter()
            .flat_map(|solution| match solution.get(name) {
                Some(bound) if allowed.contains(bound) => vec![solution],
                Some(_) => vec![],
                None => terms
                    .iter()
                    .map(|term| {
                        let mut extended = solution.clone();
                        extended.insert(name.clone(), term.clone());
                        extended
                    })
                    .collect(),
            })
            .collect();
    }

    for exclusion in &query.exclusions {
        let allowed: HashSet<&Term> = exclusion.allowed.iter().collect();
        solutions.retain(|solution| {
            let extensions = match_patterns(triples, &exclusion.patterns, vec![solution.clone()]);
            !extensions.iter().any(|ext| {
                ext.get(&exclusion.var)
                    .map(|value| !allowed.contains(value))
                    .unwrap_or(false)
            })
        });
    }

    if query.select.is_empty() {
        return solutions;
    }

    solutions
        .into_iter()
        .map(|solution| {
            solution
                .into_iter()
                .filter(|(name, _)| query.select.contains(name))
                .collect()
        })
        .collect()
}

fn match_patterns(
    triples: &[Triple],
    patterns: &[TriplePattern],
    mut solutions: Vec<Bindings>,
) -> Vec<Bindings> {
    for pattern in patterns {
        let mut next = Vec::new();
        for solution in &solutions {
            for triple in triples {
                if let Some(extended) = match_triple(pattern, triple, solution) {
                    next.push(extended);
                }
            }
        }
        solutions = next;
        if solutions.is_empty() {
            break;
        }
    }
    solutions
}

fn match_triple(pattern: &TriplePattern, triple: &Triple, solution: &Bindings) -> Option<Bindings> {
    let mut extended = solution.clone();
    for (node, term) in [
        (&pattern.subject, &triple.subject),
        (&pattern.predicate, &triple.predicate),
        (&pattern.object, &triple.object),
    ] {
        match node {
            Node::Const(expected) => {
                if expected != term {
                    return None;
                }
            }
            Node::Var(name) => match extended.get(name) {
                Some(bound) if bound != term => return None,
                Some(_) => {}
                None => {
                    extended.insert(name.clone(), term.clone());
                }
            },
        }
    }
    Some(extended)
}

fn node_to_sparql(node: &Node) -> String {
    match node {
        Node::Var(name) => format!("?{}", name),
        Node::Const(term) => term.to_sparql(),
    }
}

fn patterns_to_sparql(patterns: &[TriplePattern], indent: &str) -> String {
    patterns
        .iter()
        .map(|p| {
            format!(
                "{}{} {} {} .\n",
                indent,
                node_to_sparql(&p.subject),
                node_to_sparql(&p.predicate),
                node_to_sparql(&p.object)
            )
        })
        .collect()
}

/// `PREFIX` declarations for every namespace in [`PREFIXES`]
pub fn sparql_prefixes() -> String {
    PREFIXES
        .iter()
        .map(|(prefix, ns)| format!("PREFIX {}: <{}>\n", prefix, ns))
        .collect()
}

/// Render a query as SPARQL 1.1 `SELECT`
pub fn to_sparql(query: &Query) -> String {
    let projection = if query.select.is_empty() {
        "*".to_string()
    } else {
        query
            .select
            .iter()
            .map(|v| format!("?{}", v))
            .collect::<Vec<_>>()
            .join(" ")
    };

    let mut body = patterns_to_sparql(&query.patterns, "    ");

    for (name, terms) in &query.values {
        let terms: Vec<String> = terms.iter().map(Term::to_sparql).collect();
        body.push_str(&format!("    VALUES ?{} {{ {} }}\n", name, terms.join(" ")));
    }

    for exclusion in &query.exclusions {
        let allowed: Vec<String> = exclusion.allowed.iter().map(Term::to_sparql).collect();
        body.push_str("    FILTER NOT EXISTS {\n");
        body.push_str(&patterns_to_sparql(&exclusion.patterns, "        "));
        body.push_str(&format!(
            "        FILTER (?{} NOT IN ({}))\n",
            exclusion.var,
            allowed.join(", ")
        ));
        body.push_str("    }\n");
    }

    format!(
        "{}SELECT {} WHERE {{\n{}}}\n",
        sparql_prefixes(),
        projection,
        body
    )
}

/// Render triples as SPARQL 1.1 `INSERT DATA`
pub fn to_sparql_insert(triples: &[Triple]) -> String {
    let body: String = triples
        .iter()
        .map(|t| {
            format!(
                "    {} {} {} .\n",
                t.subject.to_sparql(),
                t.predicate.to_sparql(),
                t.object.to_sparql()
            )
        })
        .collect();
    format!("{}INSERT DATA {{\n{}}}\n", sparql_prefixes(), body)
}

/// Turn an absolute IRI back into prefixed form
pub fn compact_iri(iri: &str) -> String {
    for (prefix, ns) in PREFIXES {
        if let Some(local) = iri.strip_prefix(ns) {
            return format!("{}:{}", prefix, local);
        }
    }
    iri.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str, p: &str, o: Term) -> Triple {
        Triple::new(Term::Iri(s.into()), Term::Iri(p.into()), o)
    }

    fn graph() -> Vec<Triple> {
        vec![
            t("annot:a", "annot:quest", Term::Iri("quest:q1".into())),
            t("annot:a", "annot:dep", Term::Iri("quest:q2".into())),
            t("annot:b", "annot:quest", Term::Iri("quest:q1".into())),
            t("annot:b", "annot:dep", Term::Iri("quest:q3".into())),
            t("quest:q1", "quest:hash", Term::str("h1")),
            t("quest:q2", "quest:hash", Term::str("h2")),
            t("quest:q3", "quest:hash", Term::str("h3")),
            t("quest:q1", "quest:major", Term::Int(1)),
        ]
    }

    #[test]
    fn test_join_across_patterns() {
        let query = Query::select(&["annot", "h"])
            .pattern(var("annot"), Term::Iri("annot:quest".into()), var("quest"))
            .pattern(var("quest"), Term::Iri("quest:hash".into()), var("h"));
        let results = evaluate(&graph(), &query);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|b| b["h"] == Term::str("h1")));
        assert!(results.iter().all(|b| !b.contains_key("quest")));
    }

    #[test]
    fn test_exclusion_drops_unrecognized_dependencies() {
        let query = Query::select(&["annot"])
            .pattern(var("annot"), Term::Iri("annot:quest".into()), Term::Iri("quest:q1".into()))
            .exclude(
                Exclusion::new("dh", vec![Term::str("h1"), Term::str("h2")])
                    .pattern(var("annot"), Term::Iri("annot:dep".into()), var("dep"))
                    .pattern(var("dep"), Term::Iri("quest:hash".into()), var("dh")),
            );
        let results = evaluate(&graph(), &query);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["annot"], Term::Iri("annot:a".into()));
    }

    #[test]
    fn test_values_restrict_bound_variable() {
        let query = Query::select(&[])
            .pattern(var("q"), Term::Iri("quest:hash".into()), var("h"))
            .values("h", vec![Term::str("h2"), Term::str("h3")]);
        assert_eq!(evaluate(&graph(), &query).len(), 2);
    }

    #[test]
    fn test_typed_literals_do_not_match_strings() {
        let query = Query::select(&["q"]).pattern(
            var("q"),
            Term::Iri("quest:major".into()),
            Term::str("1"),
        );
        assert!(evaluate(&graph(), &query).is_empty());
    }

    #[test]
    fn test_sparql_rendering() {
        let query = Query::select(&["annot"])
            .pattern(var("annot"), Term::iri("annot", "call_hash"), Term::str("abc"))
            .values("h", vec![Term::str("h1")])
            .exclude(
                Exclusion::new("dh", vec![Term::str("h1")])
                    .pattern(var("annot"), Term::iri("annot", "dep"), var("dep")),
            );
        let sparql = to_sparql(&query);
        assert!(sparql.contains("PREFIX annot: <urn:annot:annotation#>"));
        assert!(sparql.contains("SELECT ?annot WHERE {"));
        assert!(sparql.contains("?annot annot:call_hash \"abc\" ."));
        assert!(sparql.contains("VALUES ?h { \"h1\" }"));
        assert!(sparql.contains("FILTER (?dh NOT IN (\"h1\"))"));
    }

    #[test]
    fn test_compact_iri() {
        assert_eq!(compact_iri("urn:annot:question#abc"), "quest:abc");
        assert_eq!(compact_iri("http://example.org/x"), "http://example.org/x");
    }
}
