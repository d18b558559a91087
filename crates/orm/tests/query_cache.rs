mod common;

use rowbound_orm::{params, LockMode, OrmConfig};

#[tokio::test]
async fn test_identical_queries_hit_the_cache_until_a_write() {
    let (registry, mut session) = common::setup().await;
    let people = session.repository("Person").await.unwrap();
    people.create_it(&mut session, [("name", "Bob")]).await.unwrap();
    session.reset_statistics();

    let mut first = people.where_("name = ?", params!["Bob"]);
    assert_eq!(first.len(&mut session).await.unwrap(), 1);
    assert_eq!(session.statistics().selects, 1);

    let mut second = people.where_("name = ?", params!["Bob"]);
    assert_eq!(second.len(&mut session).await.unwrap(), 1);
    let stats = session.statistics();
    assert_eq!(stats.selects, 1);
    assert_eq!(stats.cache_hits, 1);
    assert!(registry.query_cache().stats().hits >= 1);

    let mut other_params = people.where_("name = ?", params!["Ann"]);
    assert_eq!(other_params.len(&mut session).await.unwrap(), 0);
    assert_eq!(session.statistics().selects, 2);

    people.create_it(&mut session, [("name", "Bob")]).await.unwrap();
    let mut third = people.where_("name = ?", params!["Bob"]);
    assert_eq!(third.len(&mut session).await.unwrap(), 2);
    assert_eq!(session.statistics().selects, 3);
}

#[tokio::test]
async fn test_list_materializes_once() {
    let (_registry, mut session) = common::setup().await;
    let temperatures = session.repository("Temperature").await.unwrap();
    for degrees in [10, 20, 30] {
        temperatures.create_it(&mut session, [("degrees", degrees)]).await.unwrap();
    }
    session.reset_statistics();

    let mut list = temperatures.where_("degrees > ?", params![15]).order_by("degrees DESC").unwrap();
    assert_eq!(list.len(&mut session).await.unwrap(), 2);
    assert_eq!(list.len(&mut session).await.unwrap(), 2);
    assert_eq!(
        list.collect(&mut session, "degrees").await.unwrap(),
        params![30i64, 20i64]
    );
    assert_eq!(session.statistics().selects, 1);
    assert_eq!(session.statistics().cache_hits, 0);
    assert!(list.order_by("id").is_err());
}

#[tokio::test]
async fn test_locked_selects_bypass_the_cache() {
    let (_registry, mut session) = common::setup().await;
    let people = session.repository("Person").await.unwrap();
    people.create_it(&mut session, [("name", "Ann")]).await.unwrap();
    session.reset_statistics();

    for _ in 0..2 {
        let mut list = people.where_("name = ?", params!["Ann"]).lock(LockMode::ForUpdate).unwrap();
        assert_eq!(list.len(&mut session).await.unwrap(), 1);
    }
    assert_eq!(session.statistics().selects, 2);
}

#[tokio::test]
async fn test_write_to_child_table_purges_parent_queries() {
    let (registry, mut session) = common::setup().await;
    let people = session.repository("Person").await.unwrap();
    let person = people.create_it(&mut session, [("name", "Ann")]).await.unwrap();

    let mut list = people.find_all().include(&["Address"]).unwrap();
    list.load(&mut session).await.unwrap();
    assert_eq!(registry.query_cache().entries_for("default", "people"), 1);

    let mut address = session.repository("Address").await.unwrap().create();
    address.set("city", "Springfield").unwrap();
    person.add(&mut session, &mut address).await.unwrap();
    assert_eq!(registry.query_cache().entries_for("default", "people"), 0);

    session.reset_statistics();
    let mut list = people.find_all().include(&["Address"]).unwrap();
    let loaded = list.load(&mut session).await.unwrap();
    assert_eq!(loaded[0].cached_children("Address").map(<[_]>::len), Some(1));
    assert_eq!(session.statistics().cache_hits, 0);
}

#[tokio::test]
async fn test_cached_counts() {
    let (_registry, mut session) = common::setup().await;
    let people = session.repository("Person").await.unwrap();
    assert_eq!(people.count(&mut session).await.unwrap(), 0);
    assert_eq!(people.count(&mut session).await.unwrap(), 0);
    assert_eq!(session.statistics().selects, 1);

    people.create_it(&mut session, [("name", "Ann")]).await.unwrap();
    assert_eq!(people.count(&mut session).await.unwrap(), 1);
    assert_eq!(session.statistics().selects, 2);
}

#[tokio::test]
async fn test_cached_lists_are_read_only() {
    let (_registry, mut session) = common::setup().await;
    let people = session.repository("Person").await.unwrap();
    people.create_it(&mut session, [("name", "Ann")]).await.unwrap();

    let mut cached = people.find_all();
    assert!(cached.models_mut(&mut session).await.is_err());
    let models = cached.into_models(&mut session).await.unwrap();
    assert_eq!(models.len(), 1);

    let temperatures = session.repository("Temperature").await.unwrap();
    temperatures.create_it(&mut session, [("degrees", 3)]).await.unwrap();
    let mut own = temperatures.find_all();
    own.models_mut(&mut session).await.unwrap()[0].set("degrees", 4).unwrap();
}

#[tokio::test]
async fn test_rollback_drops_cached_results() {
    let (registry, mut session) = common::setup().await;
    let people = session.repository("Person").await.unwrap();

    session.open_transaction("default").await.unwrap();
    people.create_it(&mut session, [("name", "Ann")]).await.unwrap();
    assert_eq!(people.find_all().len(&mut session).await.unwrap(), 1);
    session.rollback_transaction("default").await.unwrap();

    assert_eq!(registry.query_cache().entries_for("default", "people"), 0);
    assert_eq!(people.find_all().len(&mut session).await.unwrap(), 0);
}

#[tokio::test]
async fn test_cache_can_be_disabled_globally() {
    let config = OrmConfig {
        cache_enabled: false,
        ..OrmConfig::default()
    };
    let (_registry, mut session) = common::setup_with(config).await;
    let people = session.repository("Person").await.unwrap();
    for _ in 0..2 {
        people.find_all().len(&mut session).await.unwrap();
    }
    assert_eq!(session.statistics().selects, 2);
}
