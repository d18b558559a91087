mod common;

use rowbound_orm::{params, DatabaseValue, Model, OrmConfig, OrmError, Related, Session};

async fn person_with_addresses(session: &mut Session, name: &str, cities: &[&str]) -> Model {
    let people = session.repository("Person").await.unwrap();
    let addresses = session.repository("Address").await.unwrap();
    let person = people.create_it(session, [("name", name)]).await.unwrap();
    for city in cities {
        let mut address = addresses.from_map([("city", *city)]).unwrap();
        person.add(session, &mut address).await.unwrap();
    }
    person
}

#[tokio::test]
async fn test_eager_loading_issues_one_query_per_association() {
    let (_registry, mut session) = common::setup().await;
    for name in ["Ann", "Bob", "Cid"] {
        person_with_addresses(&mut session, name, &["North", "South"]).await;
    }
    session.reset_statistics();

    let people = session.repository("Person").await.unwrap();
    let mut list = people.find_all().order_by("id").unwrap().include(&["Address"]).unwrap();
    let loaded = list.load(&mut session).await.unwrap();
    assert_eq!(loaded.len(), 3);
    for person in loaded {
        assert_eq!(person.cached_children("Address").unwrap().len(), 2);
    }
    assert_eq!(session.statistics().selects, 2);

    session.reset_statistics();
    let addresses = session.repository("Address").await.unwrap();
    let mut list = addresses.find_all().include(&["Person"]).unwrap();
    let loaded = list.load(&mut session).await.unwrap();
    assert_eq!(loaded.len(), 6);
    assert!(loaded.iter().all(|a| a.cached_parent("Person").is_some()));
    assert_eq!(session.statistics().selects, 2);

    let json = list.to_json(&mut session).await.unwrap();
    assert!(json[0]["person"]["name"].is_string());
}

#[tokio::test]
async fn test_parent_and_children_lookups() {
    let (_registry, mut session) = common::setup().await;
    let person = person_with_addresses(&mut session, "Ann", &["North", "South"]).await;

    let mut children = person.children(&mut session, "Address").await.unwrap();
    assert_eq!(children.len(&mut session).await.unwrap(), 2);
    let address = children.first(&mut session).await.unwrap().unwrap().clone();

    let parent = address.parent(&mut session, "Person").await.unwrap().unwrap();
    assert_eq!(parent.id(), person.id());

    let addresses = session.repository("Address").await.unwrap();
    let mut orphan = addresses.create_it(&mut session, [("city", "Nowhere")]).await.unwrap();
    assert!(orphan.parent(&mut session, "Person").await.unwrap().is_none());
    orphan.set_parent(&person).unwrap();
    orphan.save_it(&mut session).await.unwrap();
    assert_eq!(orphan.get("person_id").unwrap(), person.id().cloned().unwrap());
}

#[tokio::test]
async fn test_many_to_many_add_and_remove() {
    let (registry, mut session) = common::setup().await;
    let doctors = session.repository("Doctor").await.unwrap();
    let patients = session.repository("Patient").await.unwrap();
    let doctor = doctors.create_it(&mut session, [("name", "House")]).await.unwrap();
    let mut patient = patients.from_map([("name", "Ann")]).unwrap();

    doctor.add(&mut session, &mut patient).await.unwrap();
    assert!(!patient.is_new());
    assert_eq!(session.count_rows("default", "doctors_patients", None, &[]).await.unwrap(), 1);

    let mut treated = doctor.children(&mut session, "Patient").await.unwrap();
    assert_eq!(treated.len(&mut session).await.unwrap(), 1);
    let mut treating = patient.children(&mut session, "Doctor").await.unwrap();
    assert_eq!(treating.len(&mut session).await.unwrap(), 1);
    assert!(registry.query_cache().entries_for("default", "patients") > 0);

    assert_eq!(doctor.remove(&mut session, &mut patient).await.unwrap(), 1);
    assert_eq!(session.count_rows("default", "doctors_patients", None, &[]).await.unwrap(), 0);
    assert_eq!(registry.query_cache().entries_for("default", "patients"), 0);
    assert_eq!(registry.query_cache().entries_for("default", "doctors"), 0);
    assert!(!patient.is_frozen());

    let mut treated = doctor.children(&mut session, "Patient").await.unwrap();
    assert!(treated.is_empty(&mut session).await.unwrap());
}

#[tokio::test]
async fn test_many_to_many_eager_load() {
    let (_registry, mut session) = common::setup().await;
    let doctors = session.repository("Doctor").await.unwrap();
    let patients = session.repository("Patient").await.unwrap();
    let house = doctors.create_it(&mut session, [("name", "House")]).await.unwrap();
    let wilson = doctors.create_it(&mut session, [("name", "Wilson")]).await.unwrap();
    for name in ["Ann", "Bob"] {
        let mut patient = patients.from_map([("name", name)]).unwrap();
        house.add(&mut session, &mut patient).await.unwrap();
        if name == "Bob" {
            wilson.add(&mut session, &mut patient).await.unwrap();
        }
    }
    session.reset_statistics();

    let mut list = doctors.find_all().order_by("name").unwrap().include(&["Patient"]).unwrap();
    let loaded = list.load(&mut session).await.unwrap();
    assert_eq!(loaded[0].cached_children("Patient").unwrap().len(), 2);
    let wilson_patients = loaded[1].cached_children("Patient").unwrap();
    assert_eq!(wilson_patients.len(), 1);
    assert_eq!(wilson_patients[0].get("name").unwrap(), DatabaseValue::from("Bob"));
    assert!(wilson_patients[0].attribute("the_parent_record_id").is_none());
    assert_eq!(session.statistics().selects, 2);
}

#[tokio::test]
async fn test_polymorphic_children() {
    let (_registry, mut session) = common::setup().await;
    let articles = session.repository("Article").await.unwrap();
    let comments = session.repository("Comment").await.unwrap();
    let article = articles.create_it(&mut session, [("title", "News")]).await.unwrap();
    let mut comment = comments.from_map([("body", "First")]).unwrap();

    article.add(&mut session, &mut comment).await.unwrap();
    assert_eq!(comment.get_string("parent_type").unwrap().as_deref(), Some("Article"));

    let mut found = article.children(&mut session, "Comment").await.unwrap();
    assert_eq!(found.len(&mut session).await.unwrap(), 1);
    let parent = comment.parent(&mut session, "Article").await.unwrap().unwrap();
    assert_eq!(parent.id(), article.id());

    session.reset_statistics();
    let mut list = articles.find_all().include(&["Comment"]).unwrap();
    let loaded = list.load(&mut session).await.unwrap();
    assert_eq!(loaded[0].cached_children("Comment").unwrap().len(), 1);
    assert_eq!(session.statistics().selects, 2);

    assert_eq!(article.remove(&mut session, &mut comment).await.unwrap(), 1);
    assert!(comment.is_frozen());
}

#[tokio::test]
async fn test_unrelated_types_are_not_associated() {
    let (_registry, mut session) = common::setup().await;
    let person = person_with_addresses(&mut session, "Ann", &[]).await;
    let mut doctor = session
        .repository("Doctor")
        .await
        .unwrap()
        .create_it(&mut session, [("name", "House")])
        .await
        .unwrap();

    let err = person.add(&mut session, &mut doctor).await.unwrap_err();
    assert!(matches!(
        err,
        OrmError::NotAssociated { ref source_type, ref target_type } if source_type == "Person" && target_type == "Doctor"
    ));
    assert!(person.children(&mut session, "Doctor").await.unwrap_err().is_not_associated());
    let people = session.repository("Person").await.unwrap();
    assert!(people.find_all().include(&["Doctor"]).unwrap_err().is_not_associated());

    let unsaved = people.create();
    let mut address = session.repository("Address").await.unwrap().create();
    assert!(matches!(
        unsaved.add(&mut session, &mut address).await,
        Err(OrmError::IllegalArgument(_))
    ));
}

#[tokio::test]
async fn test_name_inference() {
    let (_registry, mut session) = common::setup().await;
    let person = person_with_addresses(&mut session, "Ann", &["North"]).await;
    assert!(matches!(
        person.related(&mut session, "addresses").await,
        Err(OrmError::IllegalArgument(_))
    ));

    let config = OrmConfig {
        name_inference: true,
        ..OrmConfig::default()
    };
    let (_registry, mut session) = common::setup_with(config).await;
    let person = person_with_addresses(&mut session, "Ann", &["North"]).await;

    match person.related(&mut session, "addresses").await.unwrap() {
        Related::Children(mut list) => assert_eq!(list.len(&mut session).await.unwrap(), 1),
        other => panic!("expected children, got {other:?}"),
    }
    let address = session
        .repository("Address")
        .await
        .unwrap()
        .find_first(&mut session, "city = ?", params!["North"])
        .await
        .unwrap()
        .unwrap();
    match address.related(&mut session, "person").await.unwrap() {
        Related::Parent(Some(parent)) => assert_eq!(parent.id(), person.id()),
        other => panic!("expected a parent, got {other:?}"),
    }
    assert!(matches!(
        person.related(&mut session, "spouse").await,
        Err(OrmError::AttributeNotFound { .. })
    ));
}
