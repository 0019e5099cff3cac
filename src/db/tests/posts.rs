use crate::db::*;
use crate::types::{JobConfig, JobId};
use chrono::{TimeZone, Utc};
use tempfile::NamedTempFile;

fn post(item_id: i64, views: i64, job_id: &JobId) -> NewPost {
    NewPost {
        source_id: "news".into(),
        item_id,
        group_id: None,
        text: format!("post {}", item_id),
        date: Utc.timestamp_opt(1_700_000_000 + item_id, 0).unwrap(),
        views,
        is_ad: false,
        job_id: job_id.clone(),
    }
}

fn media(post_id: i64, file_id: &str, url: &str) -> NewMedia {
    NewMedia {
        post_id,
        file_id: file_id.into(),
        media_type: "photo".into(),
        file_size: Some(1024),
        mime_type: Some("image/jpeg".into()),
        width: Some(800),
        height: Some(600),
        duration: None,
        file_url: Some(url.into()),
        direct_url: None,
        media_order: 0,
    }
}

#[tokio::test]
async fn test_save_post_is_idempotent_and_refreshes_views() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let first_job = db.create_job("news", &JobConfig::default()).await.unwrap().id;
    let second_job = db.create_job("news", &JobConfig::default()).await.unwrap().id;

    let id1 = db.save_post(&post(42, 10, &first_job)).await.unwrap();
    let mut again = post(42, 99, &second_job);
    again.text = "edited text is not applied".into();
    let id2 = db.save_post(&again).await.unwrap();

    assert_eq!(id1, id2);
    let stored = db.list_posts("news").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].views, 99, "second call's views win");
    assert_eq!(stored[0].job_id.as_deref(), Some(second_job.as_str()));
    assert_eq!(stored[0].text, "post 42");
}

#[tokio::test]
async fn test_same_item_id_in_different_channels_are_distinct() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let job = JobId::from("news_1");

    let a = db.save_post(&post(7, 1, &job)).await.unwrap();
    let mut other = post(7, 1, &job);
    other.source_id = "sports".into();
    let b = db.save_post(&other).await.unwrap();

    assert_ne!(a, b);
    assert!(db.get_post("sports", 7).await.unwrap().is_some());
}

#[tokio::test]
async fn test_save_media_is_idempotent_and_urls_win() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let post_id = db
        .save_post(&post(1, 0, &JobId::from("news_1")))
        .await
        .unwrap();

    let m1 = db
        .save_media(&media(post_id, "file-a", "file:///old"))
        .await
        .unwrap();
    let mut refreshed = media(post_id, "file-a", "file:///new");
    refreshed.direct_url = Some("https://cdn.example/a.jpg".into());
    let m2 = db.save_media(&refreshed).await.unwrap();

    assert_eq!(m1, m2);
    let rows = db.list_media(post_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].file_url.as_deref(), Some("file:///new"));
    assert_eq!(
        rows[0].direct_url.as_deref(),
        Some("https://cdn.example/a.jpg")
    );
}

#[tokio::test]
async fn test_media_listed_in_album_order() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let post_id = db
        .save_post(&post(1, 0, &JobId::from("news_1")))
        .await
        .unwrap();

    for (order, file_id) in [(2, "c"), (0, "a"), (1, "b")] {
        let mut row = media(post_id, file_id, "u");
        row.media_order = order;
        db.save_media(&row).await.unwrap();
    }

    let ids: Vec<_> = db
        .list_media(post_id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.file_id)
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_save_media_for_missing_post_fails() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    assert!(db.save_media(&media(12345, "f", "u")).await.is_err());
}

#[tokio::test]
async fn test_channel_stats() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let job = JobId::from("news_1");

    let empty = db.channel_stats("news").await.unwrap();
    assert_eq!(empty.total_posts, 0);
    assert_eq!(empty.total_views, 0);
    assert!(empty.min_item_id.is_none());

    let p1 = db.save_post(&post(10, 5, &job)).await.unwrap();
    let mut ad = post(30, 7, &job);
    ad.is_ad = true;
    db.save_post(&ad).await.unwrap();
    db.save_media(&media(p1, "x", "u")).await.unwrap();
    db.save_media(&media(p1, "y", "u")).await.unwrap();

    let stats = db.channel_stats("news").await.unwrap();
    assert_eq!(stats.total_posts, 2);
    assert_eq!(stats.total_media, 2);
    assert_eq!(stats.ad_posts, 1);
    assert_eq!(stats.min_item_id, Some(10));
    assert_eq!(stats.max_item_id, Some(30));
    assert_eq!(stats.total_views, 12);
}
