mod common;

use std::time::Duration;

use rowbound_orm::{params, DatabaseValue, OrmError};

#[tokio::test]
async fn test_person_lifecycle_with_timestamps() {
    let (_registry, mut session) = common::setup().await;
    let people = session.repository("Person").await.unwrap();

    let mut person = people.create();
    person.set("name", "Ann").unwrap();
    assert!(person.is_new());
    assert!(person.save_it(&mut session).await.unwrap());
    assert!(!person.is_new());
    assert!(person.long_id().is_some());

    person.refresh(&mut session).await.unwrap();
    let created = person.get_datetime("created_at").unwrap().unwrap();
    let updated = person.get_datetime("updated_at").unwrap().unwrap();
    assert_eq!(created, updated);

    std::thread::sleep(Duration::from_millis(20));
    session.reset_statistics();
    person.set("name", "Bob").unwrap();
    assert!(person.save_it(&mut session).await.unwrap());
    let stats = session.statistics();
    assert_eq!(stats.executes, 1);
    assert_eq!(stats.inserts, 0);

    person.refresh(&mut session).await.unwrap();
    assert_eq!(person.get_string("name").unwrap().as_deref(), Some("Bob"));
    assert_eq!(person.get_datetime("created_at").unwrap(), Some(created));
    assert!(person.get_datetime("updated_at").unwrap().unwrap() > created);
    assert_eq!(people.count_where(&mut session, "name = ?", &params!["Bob"]).await.unwrap(), 1);
}

#[tokio::test]
async fn test_unchanged_instance_saves_without_sql() {
    let (_registry, mut session) = common::setup().await;
    let people = session.repository("Person").await.unwrap();
    let mut person = people.create_it(&mut session, [("name", "Ann")]).await.unwrap();

    session.reset_statistics();
    assert!(person.save(&mut session).await.unwrap());
    assert_eq!(session.statistics().queries(), 0);
}

#[tokio::test]
async fn test_validation_failure() {
    let (_registry, mut session) = common::setup().await;
    let people = session.repository("Person").await.unwrap();

    let mut person = people.create();
    person.set("last_name", "Smith").unwrap();
    assert!(!person.save(&mut session).await.unwrap());
    assert_eq!(person.errors().get("name"), Some("value is missing"));
    assert!(person.is_new());

    let err = person.save_it(&mut session).await.unwrap_err();
    assert!(err.is_validation());
    match err {
        OrmError::Validation(errors) => assert_eq!(errors.len(), 1),
        other => panic!("unexpected error: {other}"),
    }

    let users = session.repository("User").await.unwrap();
    let mut user = users.from_map([("email", "not an email")]).unwrap();
    assert!(!user.save(&mut session).await.unwrap());
    user.set("email", "ann@example.com").unwrap();
    assert!(user.save(&mut session).await.unwrap());

    assert_eq!(people.count(&mut session).await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_freezes_until_thawed() {
    let (_registry, mut session) = common::setup().await;
    let people = session.repository("Person").await.unwrap();
    let mut person = people.create_it(&mut session, [("name", "Ann")]).await.unwrap();
    let first_id = person.long_id().unwrap();

    assert!(person.delete(&mut session).await.unwrap());
    assert!(person.is_frozen());
    assert!(person.get("name").unwrap_err().is_frozen());
    assert!(person.set("name", "Bob").unwrap_err().is_frozen());
    assert!(matches!(person.save(&mut session).await, Err(OrmError::Frozen { .. })));
    assert!(!people.exists(&mut session, first_id).await.unwrap());

    person.thaw();
    assert!(person.is_new());
    assert_eq!(person.get("name").unwrap(), DatabaseValue::from("Ann"));
    assert!(person.save_it(&mut session).await.unwrap());
    assert_ne!(person.long_id(), Some(first_id));
    assert!(person.exists(&mut session).await.unwrap());
}

#[tokio::test]
async fn test_versioned_update_detects_stale_copies() {
    let (_registry, mut session) = common::setup().await;
    let accounts = session.repository("Account").await.unwrap();
    let account = accounts.create_it(&mut session, [("amount", 10)]).await.unwrap();
    assert_eq!(account.get_i64("record_version").unwrap(), Some(1));
    let id = account.long_id().unwrap();

    let mut first = accounts.find_by_id(&mut session, id).await.unwrap().unwrap();
    let mut second = accounts.find_by_id(&mut session, id).await.unwrap().unwrap();

    first.set("amount", 20).unwrap();
    assert!(first.save_it(&mut session).await.unwrap());
    assert_eq!(first.get_i64("record_version").unwrap(), Some(2));

    second.set("amount", 30).unwrap();
    let err = second.save(&mut session).await.unwrap_err();
    assert!(err.is_stale());
    assert!(matches!(err, OrmError::StaleModel { version: 1, .. }));

    let stored = accounts.find_by_id(&mut session, id).await.unwrap().unwrap();
    assert_eq!(stored.get_i64("amount").unwrap(), Some(20));
}

#[tokio::test]
async fn test_preset_id_is_inserted_as_given() {
    let (_registry, mut session) = common::setup().await;
    let temperatures = session.repository("Temperature").await.unwrap();
    let mut temperature = temperatures.create();
    temperature.set_id(100).unwrap();
    temperature.set("degrees", 21).unwrap();
    assert!(temperature.insert(&mut session).await.unwrap());

    let found = temperatures.find_by_id(&mut session, 100).await.unwrap().unwrap();
    assert_eq!(found.get_i64("degrees").unwrap(), Some(21));
    assert!(temperatures.find_by_id(&mut session, 101).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_attributes_are_rejected() {
    let (_registry, mut session) = common::setup().await;
    let people = session.repository("Person").await.unwrap();
    let mut person = people.create();
    assert!(matches!(person.set("nickname", "A"), Err(OrmError::AttributeNotFound { .. })));
    assert!(matches!(
        people.find_by(&mut session, "nickname", "A").await,
        Err(OrmError::AttributeNotFound { .. })
    ));
}
