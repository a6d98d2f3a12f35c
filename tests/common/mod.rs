#![allow(dead_code)]

use rustmemodao::{
    AsyncSession, AsyncSessionConfig, Column, DaoError, DaoSession, DataType, Entity,
    ManualSpawner, MemoryDao, MemoryStore, Result, Row, Schema, TableEntity, Value,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: Option<i64>,
    pub text: Option<String>,
    pub priority: i64,
}

impl Note {
    pub fn new(text: &str) -> Self {
        Self {
            id: None,
            text: Some(text.to_string()),
            priority: 0,
        }
    }

    pub fn with_id(id: i64, text: &str) -> Self {
        Self {
            id: Some(id),
            ..Self::new(text)
        }
    }

    /// Violates the NOT NULL constraint on `text`
    pub fn invalid() -> Self {
        Self {
            id: None,
            text: None,
            priority: 0,
        }
    }
}

impl Entity for Note {
    type Key = i64;
}

impl TableEntity for Note {
    fn table_name() -> &'static str {
        "notes"
    }

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("text", DataType::Text).not_null(),
            Column::new("priority", DataType::Integer).not_null(),
        ])
    }

    fn key(&self) -> Option<i64> {
        self.id
    }

    fn to_row(&self) -> Row {
        vec![Value::from(self.text.clone()), Value::Integer(self.priority)]
    }

    fn from_row(key: i64, row: &Row) -> Result<Self> {
        match row.as_slice() {
            [Value::Text(text), Value::Integer(priority)] => Ok(Self {
                id: Some(key),
                text: Some(text.clone()),
                priority: *priority,
            }),
            _ => Err(DaoError::TypeMismatch(format!("unexpected notes row: {:?}", row))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub id: Option<i64>,
    pub label: String,
}

impl Entity for Tag {
    type Key = i64;
}

impl TableEntity for Tag {
    fn table_name() -> &'static str {
        "tags"
    }

    fn schema() -> Schema {
        Schema::new(vec![Column::new("label", DataType::Text).not_null()])
    }

    fn key(&self) -> Option<i64> {
        self.id
    }

    fn to_row(&self) -> Row {
        vec![Value::Text(self.label.clone())]
    }

    fn from_row(key: i64, row: &Row) -> Result<Self> {
        match row.as_slice() {
            [Value::Text(label)] => Ok(Self {
                id: Some(key),
                label: label.clone(),
            }),
            _ => Err(DaoError::TypeMismatch(format!("unexpected tags row: {:?}", row))),
        }
    }
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub dao_session: Arc<DaoSession>,
    pub notes: Arc<MemoryDao<Note>>,
}

pub fn fixture() -> Fixture {
    let store = MemoryStore::shared("test");
    let dao_session = DaoSession::new(store.clone())
        .with_dao(MemoryDao::<Note>::new(Arc::clone(&store)).unwrap())
        .unwrap()
        .with_dao(MemoryDao::<Tag>::new(Arc::clone(&store)).unwrap())
        .unwrap();
    let dao_session = Arc::new(dao_session);
    let notes = dao_session.dao::<MemoryDao<Note>>().unwrap();

    Fixture {
        store,
        dao_session,
        notes,
    }
}

/// Configuration that never lingers: the worker retires as soon as the
/// queue is empty and does not wait for merge partners
pub fn eager_config() -> AsyncSessionConfig {
    AsyncSessionConfig::new()
        .wait_for_merge(Duration::ZERO)
        .drain_poll_interval(Duration::ZERO)
}

/// Session whose worker only runs when the test calls `spawner.run_all()`
pub fn manual_session(fixture: &Fixture) -> (AsyncSession, Arc<ManualSpawner>) {
    let spawner = Arc::new(ManualSpawner::new());
    let session = fixture
        .dao_session
        .async_session_builder()
        .config(eager_config())
        .spawner(spawner.clone())
        .build()
        .unwrap();
    (session, spawner)
}
