#![allow(dead_code)]

use std::sync::Arc;

use rowbound_orm::validation::{email_of, presence_of};
use rowbound_orm::{EntityDescriptor, OrmConfig, Registry, RegistryBuilder, Session};

pub const SCHEMA: &str = r#"
CREATE TABLE people (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, last_name TEXT, created_at TEXT, updated_at TEXT);
CREATE TABLE addresses (id INTEGER PRIMARY KEY AUTOINCREMENT, person_id INTEGER, city TEXT);
CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, email TEXT);
CREATE TABLE doctors (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT);
CREATE TABLE patients (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT);
CREATE TABLE doctors_patients (id INTEGER PRIMARY KEY AUTOINCREMENT, doctor_id INTEGER, patient_id INTEGER);
CREATE TABLE articles (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT);
CREATE TABLE comments (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT, parent_id INTEGER, parent_type TEXT);
CREATE TABLE temperatures (id INTEGER PRIMARY KEY AUTOINCREMENT, degrees INTEGER);
CREATE TABLE shard1_temperatures (id INTEGER PRIMARY KEY AUTOINCREMENT, degrees INTEGER);
CREATE TABLE accounts (id INTEGER PRIMARY KEY AUTOINCREMENT, amount INTEGER, record_version INTEGER);
CREATE TABLE enrollments (course_id INTEGER, student_id INTEGER, PRIMARY KEY (course_id, student_id));
CREATE TABLE grades (id INTEGER PRIMARY KEY AUTOINCREMENT, enrollment_id INTEGER, score INTEGER);
"#;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn descriptors() -> Vec<EntityDescriptor> {
    vec![
        EntityDescriptor::new("Person").cached().validator(presence_of(&["name"])),
        EntityDescriptor::new("Address").cached(),
        EntityDescriptor::new("User").validator(email_of("email")),
        EntityDescriptor::new("Doctor").cached(),
        EntityDescriptor::new("Patient").cached(),
        EntityDescriptor::new("Article"),
        EntityDescriptor::new("Comment").belongs_to_polymorphic("Article", None),
        EntityDescriptor::new("Temperature"),
        EntityDescriptor::new("Account").versioned(),
        EntityDescriptor::new("Enrollment").composite_keys(&["course_id", "student_id"]),
        EntityDescriptor::new("Grade"),
    ]
}

pub fn builder(config: OrmConfig) -> RegistryBuilder {
    descriptors()
        .into_iter()
        .fold(Registry::builder().config(config), |builder, descriptor| builder.entity(descriptor))
}

/// A session on a fresh in-memory database holding the fixture schema
pub async fn open(registry: &Arc<Registry>) -> Session {
    init_tracing();
    let mut session = registry.session();
    session.open("default", "sqlite::memory:").await.unwrap();
    session.exec_batch("default", SCHEMA).await.unwrap();
    session.reset_statistics();
    session
}

pub async fn setup_with(config: OrmConfig) -> (Arc<Registry>, Session) {
    let registry = builder(config).build().unwrap();
    let session = open(&registry).await;
    (registry, session)
}

pub async fn setup() -> (Arc<Registry>, Session) {
    setup_with(OrmConfig::default()).await
}
