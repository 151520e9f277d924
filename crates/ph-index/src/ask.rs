//! Retrieval-augmented answers over an environment's command history.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;

use ph_core::model::{CommandRecord, EnvironmentId};
use ph_core::storage::RecordStore;

use crate::error::IndexError;
use crate::search::SearchEngine;

/// A retrieved record and its similarity to the question.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerSource {
    pub record: CommandRecord,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub text: String,
    pub sources: Vec<AnswerSource>,
}

/// Turns a question plus retrieved context into answer text.
///
/// Implementations only ever see records retrieved from the asked
/// environment.
pub trait AnswerComposer: Send + Sync {
    fn compose(&self, question: &str, context: &[AnswerSource]) -> Result<String, IndexError>;
}

/// Lists the retrieved commands in rank order. Deterministic.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractiveComposer;

impl AnswerComposer for ExtractiveComposer {
    fn compose(&self, question: &str, context: &[AnswerSource]) -> Result<String, IndexError> {
        let mut out = String::new();
        let _ = writeln!(out, "Commands most relevant to \"{question}\":");
        for (rank, source) in context.iter().enumerate() {
            let r = &source.record;
            let status = r
                .exit_code
                .map(|c| format!("exit {c}"))
                .unwrap_or_else(|| "exit ?".into());
            let _ = writeln!(
                out,
                "  {}. {}  [{status}, {}, {}]",
                rank + 1,
                r.command,
                r.cwd.display(),
                r.captured_at.format("%Y-%m-%d %H:%M")
            );
        }
        Ok(out)
    }
}

/// Answers questions by retrieving the top-k records of an environment.
pub struct AskEngine {
    engine: Arc<SearchEngine>,
    store: RecordStore,
    composer: Box<dyn AnswerComposer>,
    limit: usize,
}

impl AskEngine {
    pub fn new(engine: Arc<SearchEngine>, store: RecordStore, limit: usize) -> Self {
        Self {
            engine,
            store,
            composer: Box::new(ExtractiveComposer),
            limit: limit.max(1),
        }
    }

    /// Replace the answer composition step.
    pub fn with_composer(mut self, composer: Box<dyn AnswerComposer>) -> Self {
        self.composer = composer;
        self
    }

    pub fn ask(&self, question: &str, environment: &EnvironmentId) -> Result<Answer, IndexError> {
        if self.engine.indexed_count(environment)? == 0 {
            return Err(IndexError::EmptyEnvironment {
                environment: environment.clone(),
            });
        }

        let hits = self.engine.search(question, environment, self.limit)?;
        let mut sources = Vec::with_capacity(hits.len());
        for hit in hits {
            let record = self.store.get(&hit.record)?;
            sources.push(AnswerSource {
                record,
                score: hit.score,
            });
        }

        let text = self.composer.compose(question, &sources)?;
        Ok(Answer {
            question: question.to_string(),
            text,
            sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use ph_core::model::{Environment, RecordDraft};
    use ph_core::storage::DataDir;
    use tempfile::TempDir;

    fn setup() -> (TempDir, RecordStore, Arc<SearchEngine>, Environment) {
        let tmp = TempDir::new().unwrap();
        let data = DataDir::open(tmp.path()).unwrap();
        let env = Environment::new(EnvironmentId("e1".into()), tmp.path().into(), None);
        data.write_environment(&env).unwrap();
        let engine = Arc::new(SearchEngine::new(
            data.clone(),
            Arc::new(HashingEmbedder::default()),
        ));
        (tmp, RecordStore::new(data), engine, env)
    }

    fn record_all(store: &RecordStore, engine: &SearchEngine, env: &Environment, cmds: &[&str]) {
        for cmd in cmds {
            let record = store
                .append_record(Some(env), RecordDraft::new(*cmd, "/w"))
                .unwrap();
            engine.index(&record).unwrap();
        }
    }

    #[test]
    fn test_ask_retrieves_commit() {
        let (_tmp, store, engine, env) = setup();
        record_all(
            &store,
            &engine,
            &env,
            &["git status", "ls -la", "git commit -m fix"],
        );

        let ask = AskEngine::new(Arc::clone(&engine), store, 1);
        let answer = ask.ask("what did I commit?", &env.id).unwrap();
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].record.command, "git commit -m fix");
        assert!(answer.text.contains("git commit -m fix"));
    }

    #[test]
    fn test_ask_is_deterministic() {
        let (_tmp, store, engine, env) = setup();
        record_all(&store, &engine, &env, &["cargo test", "cargo build", "git log"]);

        let ask = AskEngine::new(Arc::clone(&engine), store, 3);
        let a = ask.ask("how did I build?", &env.id).unwrap();
        let b = ask.ask("how did I build?", &env.id).unwrap();
        assert_eq!(a.text, b.text);
    }

    #[test]
    fn test_ask_empty_environment() {
        let (_tmp, store, engine, env) = setup();
        engine.rebuild(&store, &env.id).unwrap();

        let ask = AskEngine::new(engine, store, 3);
        assert!(matches!(
            ask.ask("anything?", &env.id),
            Err(IndexError::EmptyEnvironment { .. })
        ));
    }

    #[test]
    fn test_custom_composer_only_sees_retrieved_context() {
        struct CountingComposer;
        impl AnswerComposer for CountingComposer {
            fn compose(&self, _q: &str, context: &[AnswerSource]) -> Result<String, IndexError> {
                Ok(format!("{} sources", context.len()))
            }
        }

        let (_tmp, store, engine, env) = setup();
        record_all(&store, &engine, &env, &["a", "b", "c", "d"]);

        let ask = AskEngine::new(engine, store, 2).with_composer(Box::new(CountingComposer));
        assert_eq!(ask.ask("a", &env.id).unwrap().text, "2 sources");
    }
}
