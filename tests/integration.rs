use image::{ImageFormat, Rgb, RgbImage};
use newsletter_uploader::{
    app::{App, AppServices},
    cache::{ContentCache, TemplateCache},
    image::{ImageCompressor, HARD_LIMIT_BYTES},
    mailchimp::{MailchimpClient, MockMailchimpClient},
    models::{AssetRequest, Document, Fingerprint, Priority, UsageContext},
    retry::RetryPolicy,
    uploader::{BatchUploader, UploadSettings},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_settings(pool: usize) -> UploadSettings {
    UploadSettings {
        max_concurrent_uploads: pool,
        retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_secs(10)),
    }
}

/// Uncompressed 24-bit BMP of a smooth gradient. 1024x1024 is about 3 MB.
fn write_gradient_bmp(dir: &Path, name: &str, size: u32) -> PathBuf {
    let image = RgbImage::from_fn(size, size, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let path = dir.join(name);
    image.save_with_format(&path, ImageFormat::Bmp).unwrap();
    path
}

fn write_small_png(dir: &Path, name: &str, seed: u8) -> PathBuf {
    let image = RgbImage::from_pixel(16, 16, Rgb([seed, 128, 255 - seed]));
    let path = dir.join(name);
    image.save_with_format(&path, ImageFormat::Png).unwrap();
    path
}

#[tokio::test]
async fn test_mixed_batch_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let hero = write_gradient_bmp(dir.path(), "hero.bmp", 1024);
    let story = write_small_png(dir.path(), "story.png", 10);
    let logo = write_small_png(dir.path(), "logo.png", 20);
    let broken = write_small_png(dir.path(), "broken.png", 30);
    assert!(std::fs::metadata(&hero).unwrap().len() > 3 * 1024 * 1024);

    let cache = Arc::new(ContentCache::open(dir.path().join("images.json")));
    cache
        .record(
            &Fingerprint::of_file(&story).unwrap(),
            "https://mcusercontent.com/earlier/story.png",
        )
        .unwrap();

    let mailchimp = MockMailchimpClient::new().with_permanent_failure("broken.png");
    let compressor = ImageCompressor::new(&dir.path().join("compressed")).unwrap();
    let uploader = BatchUploader::new(
        Arc::new(mailchimp.clone()),
        Arc::new(compressor),
        Arc::clone(&cache),
        fast_settings(5),
    );

    let assets = uploader.prepare_assets(&[
        AssetRequest::new(&hero)
            .with_usage(UsageContext::Hero)
            .with_priority(Priority::Critical),
        AssetRequest::new(&story),
        AssetRequest::new(&logo)
            .with_usage(UsageContext::Footer)
            .with_priority(Priority::Optional),
        AssetRequest::new(&broken),
    ]);
    let summary = uploader.process(assets).await.unwrap();

    assert!(summary.is_consistent());
    assert_eq!(summary.total, 4);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.cached_hits, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 0);

    let files = mailchimp.get_files();
    let hero_upload = files.get("hero.jpg").expect("hero uploaded as jpeg");
    assert!(hero_upload.len() as u64 <= HARD_LIMIT_BYTES);
    assert_eq!(files.get("logo.png"), Some(&std::fs::read(&logo).unwrap()));

    assert_eq!(
        summary.url_for(&story.to_string_lossy()),
        Some("https://mcusercontent.com/earlier/story.png")
    );
    assert!(summary.url_for(&broken.to_string_lossy()).is_none());
    // hero + logo once each, broken three times, nothing for the cached story
    assert_eq!(mailchimp.get_upload_count(), 5);
    assert_eq!(cache.len(), 3);
    // compressed copies are cleaned up once each upload settles
    assert_eq!(
        std::fs::read_dir(dir.path().join("compressed"))
            .unwrap()
            .count(),
        0
    );
}

#[tokio::test]
async fn test_critical_asset_that_cannot_compress_aborts_without_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let hero = write_gradient_bmp(dir.path(), "hero.bmp", 256);
    let logo = write_small_png(dir.path(), "logo.png", 1);

    let client = MailchimpClient::new("key".to_string(), "us21", Duration::from_secs(5))
        .unwrap()
        .with_base_url(server.uri());
    let compressor = ImageCompressor::new(&dir.path().join("out"))
        .unwrap()
        .with_limits(300, 0.95);

    let mut app = App::with_services(
        AppServices {
            mailchimp: Arc::new(client),
            compressor: Arc::new(compressor),
            content_cache: Arc::new(ContentCache::open(dir.path().join("images.json"))),
            template_cache: TemplateCache::open(dir.path().join("templates.json")),
        },
        fast_settings(2),
    );

    let err = app
        .run(
            &[
                AssetRequest::new(&logo),
                AssetRequest::new(&hero).with_priority(Priority::Critical),
            ],
            &[Document::new("t", "<html><body></body></html>")],
        )
        .await
        .err()
        .expect("critical compression failure aborts the run");

    assert!(err.is_critical());
}

#[tokio::test]
async fn test_end_to_end_against_http_api() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/file-manager/files"))
        .and(header("Authorization", "apikey secret"))
        .and(body_string_contains("\"name\":\"logo.png\""))
        .and(body_string_contains("\"type\":\"image\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "full_size_url": "https://mcusercontent.com/acct/images/logo.png"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/templates"))
        .and(body_string_contains("https://mcusercontent.com/acct/images/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": 4242 })))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let logo = write_small_png(dir.path(), "logo.png", 5);
    let copy = dir.path().join("logo-copy.png");
    std::fs::copy(&logo, &copy).unwrap();

    let client = MailchimpClient::new("secret".to_string(), "us21", Duration::from_secs(5))
        .unwrap()
        .with_base_url(server.uri());
    let mut app = App::with_services(
        AppServices {
            mailchimp: Arc::new(client),
            compressor: Arc::new(ImageCompressor::new(&dir.path().join("out")).unwrap()),
            content_cache: Arc::new(ContentCache::open(dir.path().join("images.json"))),
            template_cache: TemplateCache::open(dir.path().join("templates.json")),
        },
        fast_settings(3),
    );

    let html = |src: &str| format!("<html><body><img src=\"{}\"></body></html>", src);
    let documents = vec![
        Document::new("Ghana_en_en-GH_20260101_090000", html("images/logo.png")),
        Document::new("Togo_fr_fr-TG_20260101_090000", html("images/logo-copy.png")),
    ];

    let report = app
        .run(
            &[
                AssetRequest::new(&logo).with_reference("images/logo.png"),
                AssetRequest::new(&copy).with_reference("images/logo-copy.png"),
            ],
            &documents,
        )
        .await
        .unwrap();

    assert_eq!(report.images.succeeded, 1);
    assert_eq!(report.images.duplicates, 1);
    assert!(report.templates.iter().all(|t| t.success));
    assert_eq!(
        report.templates[0].remote_template_id.as_deref(),
        Some("4242")
    );

    let summary = report.template_summary();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.succeeded, 2);

    let reopened = TemplateCache::open(dir.path().join("templates.json"));
    assert_eq!(
        reopened
            .get("Ghana_en_en-GH_20260101_090000")
            .map(|r| r.remote_template_id.as_str()),
        Some("4242")
    );
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let hero = write_gradient_bmp(dir.path(), "hero.bmp", 1024);
    let cache_path = dir.path().join("images.json");

    let run = |mailchimp: MockMailchimpClient| {
        let compressor = ImageCompressor::new(&dir.path().join("out")).unwrap();
        let uploader = BatchUploader::new(
            Arc::new(mailchimp),
            Arc::new(compressor),
            Arc::new(ContentCache::open(&cache_path)),
            fast_settings(1),
        );
        let assets = uploader.prepare_assets(&[AssetRequest::new(&hero)]);
        async move { uploader.process(assets).await.unwrap() }
    };

    let first_client = MockMailchimpClient::new();
    let first = run(first_client.clone()).await;
    assert_eq!(first.succeeded, 1);
    assert_eq!(first_client.get_upload_count(), 1);

    let second_client = MockMailchimpClient::new();
    let second = run(second_client.clone()).await;
    assert_eq!(second.cached_hits, 1);
    assert_eq!(second_client.get_upload_count(), 0);
    assert_eq!(second.url_mapping, first.url_mapping);
}
