use std::path::{Path, PathBuf};

use agent_config::{CorruptPolicy, MemoryConfig, PersistenceConfig};
use agent_memory::{
    CharacterOrdinalVectorizer, Event, Execution, FactInsert, Interaction, MemoryError, MemoryTiers,
    SemanticMatch, SkillRegistration, TaskScratchpad,
};
use anyhow::{Context, Result, ensure};
use chrono::Timelike;
use serde_json::{Map, Value, json};

fn temp_root() -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("agent-memory-tiers-{}", uuid::Uuid::new_v4()));
    path
}

async fn open(root: &Path) -> Result<MemoryTiers> {
    let _ = agent_telemetry::init_tracing("agent_memory=debug");
    MemoryTiers::builder(MemoryConfig::file_backed(root))
        .build()
        .await
        .context("building file-backed tiers")
}

fn write_document(root: &Path, key_space: &str, document: &Value) -> Result<()> {
    std::fs::write(root.join(format!("{key_space}.json")), serde_json::to_vec_pretty(document)?)?;
    Ok(())
}

fn embed(text: &str) -> Vec<f32> {
    CharacterOrdinalVectorizer::default().embed_text(text)
}

#[tokio::test]
async fn every_tier_survives_reopen() -> Result<()> {
    let root = temp_root();

    {
        let tiers = open(&root).await?;

        let receipt = tiers
            .episodic()
            .record_event(
                Event::builder("e1", "agent-1", "u1", "booked a table for two")
                    .meta("channel", json!("chat"))
                    .build()?,
            )
            .await?;
        ensure!(receipt.is_indexed(), "event should be searchable");

        ensure!(tiers.semantic().add_fact("Paris", "capital_of", "France").await? == FactInsert::Added);
        tiers
            .semantic()
            .add_entity("Paris", "City on the Seine", None)
            .await?;

        tiers
            .procedural()
            .register(
                SkillRegistration::new("summarise", "1.0.0", "skills.summarise.run", "Summarises text")?
                    .with_permissions(["read:documents"]),
            )
            .await?;

        tiers
            .short_term()
            .store("c1", vec![Interaction::new("user", "hi")])
            .await?;
        tiers
            .working()
            .update("t1", TaskScratchpad::new("plan trip", 2, vec![json!("flights")]))
            .await?;
        tiers
            .long_term()
            .save_preference("u1", "theme", json!("dark"))
            .await?;
        tiers
            .long_term()
            .store_document("d1", "file:///notes.md", "Trip notes for Paris", Some("u1"))
            .await?;
    }

    let tiers = open(&root).await?;

    let recalled = tiers.episodic().recall_events("u1", "booked", 5).await?;
    ensure!(recalled.len() == 1 && recalled[0].event_id() == "e1");
    ensure!(recalled[0].meta().get("channel") == Some(&json!("chat")));

    ensure!(tiers.semantic().add_fact("Paris", "capital_of", "France").await? == FactInsert::Duplicate);
    let matches = tiers.semantic().query("paris").await?.into_vec();
    ensure!(matches.len() == 2);
    ensure!(matches!(matches[0], SemanticMatch::EntityDescription(_)));
    ensure!(matches!(matches[1], SemanticMatch::Fact(_)));

    let skill = tiers.procedural().find("summarise", "latest").await?;
    ensure!(skill.version() == "1.0.0");
    ensure!(skill.permissions().contains("read:documents"));
    let execution = tiers
        .procedural()
        .apply("summarise", "1.0.0", Map::from_iter([("text".to_owned(), json!("..."))]))
        .await?;
    ensure!(matches!(execution, Execution::Applied { .. }));

    ensure!(tiers.short_term().retrieve("c1").await?.len() == 1);
    let scratchpad = tiers.working().retrieve("t1").await?.context("scratchpad missing")?;
    ensure!(scratchpad.current_step() == 2);

    let theme = tiers
        .long_term()
        .get_preference("u1", "theme")
        .await?
        .context("preference missing")?;
    ensure!(theme.value() == &json!("dark"));
    ensure!(tiers.long_term().find_documents("PARIS", Some("u1")).await?.len() == 1);
    ensure!(tiers.long_term().find_documents("paris", Some("u2")).await?.is_empty());

    let _ = std::fs::remove_dir_all(root);
    Ok(())
}

#[tokio::test]
async fn corrupt_documents_follow_the_policy() -> Result<()> {
    let root = temp_root();
    std::fs::create_dir_all(&root)?;
    std::fs::write(root.join("sm_knowledge_graph.json"), b"{ not json")?;

    let open_tiers = open(&root).await?;
    ensure!(open_tiers.semantic().facts().await?.is_empty());

    let closed = MemoryTiers::builder(
        MemoryConfig::file_backed(&root)
            .with_persistence(PersistenceConfig::default().with_on_corrupt(CorruptPolicy::Error)),
    )
    .build()
    .await?;
    let err = closed
        .semantic()
        .facts()
        .await
        .expect_err("fail-closed load should surface corruption");
    ensure!(matches!(err, MemoryError::CorruptDocument { .. }));

    let _ = std::fs::remove_dir_all(root);
    Ok(())
}

#[tokio::test]
async fn concurrent_writers_do_not_lose_updates() -> Result<()> {
    let root = temp_root();
    let tiers = open(&root).await?;

    let writers: Vec<_> = (0..16)
        .map(|i| {
            let tiers = tiers.clone();
            tokio::spawn(async move {
                tiers
                    .semantic()
                    .add_fact(&format!("node-{i}"), "links_to", "hub")
                    .await
            })
        })
        .collect();
    for writer in writers {
        writer.await??;
    }

    ensure!(tiers.semantic().facts().await?.len() == 16);

    let reopened = open(&root).await?;
    ensure!(reopened.semantic().facts().await?.len() == 16);

    let _ = std::fs::remove_dir_all(root);
    Ok(())
}

#[tokio::test]
async fn tiers_on_one_directory_share_document_locks() -> Result<()> {
    let root = temp_root();
    let first = open(&root).await?;
    let second = open(&root).await?;

    let writers: Vec<_> = (0..16)
        .map(|i| {
            let tiers = if i % 2 == 0 { first.clone() } else { second.clone() };
            tokio::spawn(async move {
                tiers
                    .semantic()
                    .add_fact(&format!("node-{i}"), "links_to", "hub")
                    .await
            })
        })
        .collect();
    for writer in writers {
        writer.await??;
    }

    ensure!(first.semantic().facts().await?.len() == 16);
    ensure!(second.semantic().facts().await?.len() == 16);

    let _ = std::fs::remove_dir_all(root);
    Ok(())
}

#[tokio::test]
async fn reads_and_extends_documents_with_naive_timestamps() -> Result<()> {
    let root = temp_root();
    std::fs::create_dir_all(&root)?;
    let at = "2024-05-01T10:00:00.123456";

    write_document(
        &root,
        "em_event_log",
        &json!([{
            "event_id": "e0",
            "agent_id": "agent-1",
            "user_id": "u1",
            "timestamp": at,
            "text": "booked a table for two",
            "meta": {}
        }]),
    )?;
    write_document(
        &root,
        "em_vector_index",
        &json!({ "e0": { "embedding": embed("booked a table for two"), "user_id": "u1", "timestamp": at } }),
    )?;
    write_document(
        &root,
        "ltm_preferences",
        &json!({ "u1": { "theme": { "value": "dark", "updated_at": at } } }),
    )?;
    write_document(
        &root,
        "ltm_documents",
        &json!({
            "d0": {
                "s3_uri": "s3://bucket/notes.md",
                "summary": "Trip notes for Paris",
                "embedding": embed("Trip notes for Paris"),
                "user_id": "u1",
                "indexed_at": at
            },
            "d1": {
                "s3_uri": "s3://bucket/policy.pdf",
                "summary": "Expense policy",
                "embedding": embed("Expense policy"),
                "user_id": null,
                "indexed_at": at
            }
        }),
    )?;
    write_document(
        &root,
        "pm_skill_registry",
        &json!({
            "summarise": {
                "versions": {
                    "1.0.0": {
                        "entry_point": "skills.summarise.run",
                        "description": "Summarises text",
                        "permissions": ["analyst"],
                        "checksum": "0x5f3e2a",
                        "registered_at": at
                    }
                },
                "latest": "1.0.0"
            }
        }),
    )?;
    write_document(
        &root,
        "sm_knowledge_graph",
        &json!([{ "subject": "Paris", "relation": "capital_of", "object": "France" }]),
    )?;
    write_document(
        &root,
        "sm_entity_index",
        &json!({ "Paris": { "description": "City on the Seine", "embedding": embed("City on the Seine"), "metadata": {} } }),
    )?;
    write_document(
        &root,
        "stm_cache",
        &json!({ "c1": [{ "role": "user", "content": "hi", "ts": at }] }),
    )?;
    write_document(
        &root,
        "wm_scratchpad",
        &json!({ "t1": { "goal": "plan trip", "current_step": 2, "intermediate_results": ["flights"] } }),
    )?;

    let tiers = open(&root).await?;

    let events = tiers.episodic().events_for_user("u1").await?;
    ensure!(events.len() == 1, "legacy event should load");
    ensure!(events[0].timestamp().nanosecond() == 123_456_000);
    let recalled = tiers.episodic().recall_events("u1", "booked", 5).await?;
    ensure!(recalled.len() == 1 && recalled[0].event_id() == "e0");
    tiers
        .episodic()
        .record_event(Event::builder("e1", "agent-1", "u1", "ordered a taxi").build()?)
        .await?;
    let log: Value = serde_json::from_slice(&std::fs::read(root.join("em_event_log.json"))?)?;
    ensure!(log.as_array().map(Vec::len) == Some(2), "legacy event must survive an append");
    ensure!(log[0]["event_id"] == json!("e0"));

    let theme = tiers
        .long_term()
        .get_preference("u1", "theme")
        .await?
        .context("legacy preference missing")?;
    ensure!(theme.value() == &json!("dark"));

    let found = tiers.long_term().find_documents("paris", Some("u1")).await?.into_vec();
    ensure!(found.len() == 1, "legacy document should be searchable");
    ensure!(found[0].doc_id() == "d0" && found[0].uri() == "s3://bucket/notes.md");
    let unowned = tiers.long_term().document("d1").await?.context("unowned document missing")?;
    ensure!(unowned.doc_id() == "d1" && unowned.user_id().is_none());

    let skill = tiers.procedural().find("summarise", "latest").await?;
    ensure!(skill.skill_name() == "summarise" && skill.version() == "1.0.0");
    ensure!(skill.permissions().contains("analyst"));

    ensure!(tiers.semantic().add_fact("Paris", "capital_of", "France").await? == FactInsert::Duplicate);
    let entity = tiers.semantic().entity("Paris").await?.context("legacy entity missing")?;
    ensure!(entity.entity_name() == "Paris");
    let matches = tiers.semantic().query("seine").await?.into_vec();
    ensure!(matches!(&matches[..], [SemanticMatch::EntityDescription(hit)] if hit.entity_name() == "Paris"));

    let buffer = tiers.short_term().retrieve("c1").await?;
    ensure!(buffer.len() == 1 && buffer[0].content() == "hi");
    ensure!(buffer[0].extra().get("ts") == Some(&json!(at)));

    let scratchpad = tiers.working().retrieve("t1").await?.context("legacy scratchpad missing")?;
    ensure!(scratchpad.current_step() == 2);

    let _ = std::fs::remove_dir_all(root);
    Ok(())
}
