mod common;

use rowbound_orm::{AssociationKind, Model, OrmConfig, OrmError, Session};

async fn count(session: &mut Session, table: &str) -> i64 {
    session.count_rows("default", table, None, &[]).await.unwrap()
}

/// house - ann - wilson, linked through the join table
async fn two_doctors_sharing_a_patient(session: &mut Session) -> (Model, Model, Model) {
    let doctors = session.repository("Doctor").await.unwrap();
    let patients = session.repository("Patient").await.unwrap();
    let house = doctors.create_it(session, [("name", "House")]).await.unwrap();
    let wilson = doctors.create_it(session, [("name", "Wilson")]).await.unwrap();
    let mut ann = patients.create_it(session, [("name", "Ann")]).await.unwrap();
    house.add(session, &mut ann).await.unwrap();
    wilson.add(session, &mut ann).await.unwrap();
    (house, wilson, ann)
}

#[tokio::test]
async fn test_cascade_deletes_children() {
    let (_registry, mut session) = common::setup().await;
    let people = session.repository("Person").await.unwrap();
    let addresses = session.repository("Address").await.unwrap();
    let mut person = people.create_it(&mut session, [("name", "Ann")]).await.unwrap();
    for city in ["North", "South"] {
        let mut address = addresses.from_map([("city", city)]).unwrap();
        person.add(&mut session, &mut address).await.unwrap();
    }
    addresses.create_it(&mut session, [("city", "Elsewhere")]).await.unwrap();

    person.delete_cascade(&mut session).await.unwrap();
    assert!(person.is_frozen());
    assert_eq!(count(&mut session, "people").await, 0);
    assert_eq!(count(&mut session, "addresses").await, 1);
}

#[tokio::test]
async fn test_cascade_follows_many_to_many_edges() {
    let (_registry, mut session) = common::setup().await;
    let (mut house, _wilson, _ann) = two_doctors_sharing_a_patient(&mut session).await;

    house.delete_cascade(&mut session).await.unwrap();
    assert_eq!(count(&mut session, "doctors").await, 0);
    assert_eq!(count(&mut session, "patients").await, 0);
    assert_eq!(count(&mut session, "doctors_patients").await, 0);
}

#[tokio::test]
async fn test_cascade_skips_excluded_associations() {
    let (registry, mut session) = common::setup().await;
    let (mut house, _wilson, _ann) = two_doctors_sharing_a_patient(&mut session).await;
    let excluded: Vec<_> = registry
        .associations_of("Patient")
        .unwrap()
        .into_iter()
        .filter(|a| a.kind() == AssociationKind::ManyToMany && a.target() == "Doctor")
        .collect();
    assert_eq!(excluded.len(), 1);

    house.delete_cascade_except(&mut session, &excluded).await.unwrap();
    assert_eq!(count(&mut session, "doctors").await, 1);
    assert_eq!(count(&mut session, "patients").await, 0);
    assert_eq!(count(&mut session, "doctors_patients").await, 1);
}

#[tokio::test]
async fn test_shallow_cascade_stops_at_immediate_rows() {
    let (_registry, mut session) = common::setup().await;
    let (mut house, _wilson, _ann) = two_doctors_sharing_a_patient(&mut session).await;

    house.delete_cascade_shallow(&mut session).await.unwrap();
    assert!(house.is_frozen());
    assert_eq!(count(&mut session, "doctors").await, 1);
    assert_eq!(count(&mut session, "patients").await, 1);
    assert_eq!(count(&mut session, "doctors_patients").await, 1);
}

#[tokio::test]
async fn test_cascade_depth_is_bounded() {
    let config = OrmConfig {
        cascade_depth: 1,
        ..OrmConfig::default()
    };
    let (_registry, mut session) = common::setup_with(config).await;
    let (mut house, _wilson, _ann) = two_doctors_sharing_a_patient(&mut session).await;

    let err = house.delete_cascade(&mut session).await.unwrap_err();
    assert!(matches!(err, OrmError::IllegalArgument(message) if message.contains("depth")));
}

#[tokio::test]
async fn test_cascade_refuses_a_deleted_instance() {
    let (_registry, mut session) = common::setup().await;
    let people = session.repository("Person").await.unwrap();
    let addresses = session.repository("Address").await.unwrap();
    let mut person = people.create_it(&mut session, [("name", "Ann")]).await.unwrap();
    let old_id = person.id().cloned().unwrap();
    person.delete(&mut session).await.unwrap();

    let mut orphan = addresses.from_map([("city", "North")]).unwrap();
    orphan.set("person_id", old_id).unwrap();
    orphan.save_it(&mut session).await.unwrap();

    assert!(matches!(person.delete_cascade(&mut session).await, Err(OrmError::Frozen { .. })));
    assert!(matches!(person.delete_cascade_shallow(&mut session).await, Err(OrmError::Frozen { .. })));
    assert_eq!(count(&mut session, "addresses").await, 1);
}

#[tokio::test]
async fn test_cascade_needs_a_single_key_to_reach_children() {
    let (_registry, mut session) = common::setup().await;
    let enrollments = session.repository("Enrollment").await.unwrap();
    let grades = session.repository("Grade").await.unwrap();
    let mut enrollment = enrollments
        .create_it(&mut session, [("course_id", 1), ("student_id", 7)])
        .await
        .unwrap();
    grades
        .create_it(&mut session, [("enrollment_id", 1), ("score", 90)])
        .await
        .unwrap();

    for result in [
        enrollment.delete_cascade(&mut session).await,
        enrollment.delete_cascade_shallow(&mut session).await,
    ] {
        assert!(matches!(result, Err(OrmError::IllegalArgument(message)) if message.contains("composite")));
    }
    assert!(!enrollment.is_frozen());
    assert_eq!(count(&mut session, "enrollments").await, 1);
    assert_eq!(count(&mut session, "grades").await, 1);

    let mut grade = grades.find_all().first(&mut session).await.unwrap().cloned().unwrap();
    grade.delete_cascade(&mut session).await.unwrap();
    assert_eq!(count(&mut session, "grades").await, 0);
}
