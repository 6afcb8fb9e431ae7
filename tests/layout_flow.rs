use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::{Value, json};
use std::io::Cursor;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

use llm_layout_rust::enrich::{GenerationFuture, GenerationRequest, GenerationService};
use llm_layout_rust::server::{Connector, ServerState, router};
use llm_layout_rust::settings::Settings;
use llm_layout_rust::{ArtifactId, ArtifactStore, LayoutError, Pipeline, RawRect};

const ANSWER: &str = r#"```json
{"element1": {"text": "SALE", "font": "Arial.ttf", "color": [255, 255, 255]}}
```"#;

struct Scripted(String);

impl GenerationService for Scripted {
    fn generate(&self, request: GenerationRequest) -> GenerationFuture {
        let answer = self.0.clone();
        Box::pin(async move {
            assert!(request.image.is_some());
            Ok(answer)
        })
    }
}

fn background_png() -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, image::Rgb([200, 200, 200])))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn rects() -> Vec<RawRect> {
    vec![
        RawRect {
            left: 10.0,
            top: 10.0,
            width: 100.0,
            height: 40.0,
        },
        RawRect {
            left: 10.0,
            top: 60.0,
            width: 100.0,
            height: 30.0,
        },
    ]
}

fn pipeline() -> (TempDir, Pipeline) {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    store.import_source("shop.png", background_png()).unwrap();
    (dir, Pipeline::with_store(Settings::default(), store))
}

#[tokio::test]
async fn annotate_enrich_compose() {
    let (_dir, pipeline) = pipeline();
    let saved = pipeline.save_rectangles("shop.png", &rects(), "summer sale").unwrap();
    assert_eq!(saved.regions, 2);
    assert!(saved.saved_image.starts_with("rect_shop_"));
    assert!(saved.saved_image.ends_with(".png"));

    let document = pipeline
        .enrich(&saved.saved_image, Scripted(ANSWER.to_string()))
        .await
        .unwrap();
    let texts = document
        .regions()
        .map(|(_, element)| element.text.clone())
        .collect::<Vec<_>>();
    assert_eq!(texts, vec!["SALE".to_string(), String::new()]);
    assert_eq!(document.user_intention(), "summer sale");

    let composed = pipeline.compose(&saved.saved_image, true).unwrap();
    assert_eq!(composed.text_nodes, 1);
    assert_eq!(composed.skipped, vec!["element2".to_string()]);

    let svg = String::from_utf8(pipeline.store().read(&composed.svg).unwrap()).unwrap();
    assert!(svg.contains(r##"fill="#ffffff">SALE</text>"##));
    let png_name = composed.png.unwrap();
    let png = image::load_from_memory(&pipeline.store().read(&png_name).unwrap()).unwrap();
    assert_eq!((png.width(), png.height()), (200, 100));
}

#[tokio::test]
async fn failed_enrichment_keeps_stored_document() {
    let (_dir, pipeline) = pipeline();
    let saved = pipeline.save_rectangles("shop.png", &rects(), "").unwrap();
    let before = pipeline.store().read(&saved.document).unwrap();

    let err = pipeline
        .enrich(
            &saved.saved_image,
            Scripted(r#"{"element1": {"text": "A"}, "element9": {"text": "B"}}"#.to_string()),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LayoutError>(),
        Some(LayoutError::UnknownRegion(id)) if id == "element9"
    ));
    assert_eq!(pipeline.store().read(&saved.document).unwrap(), before);
}

async fn spawn_server(pipeline: Pipeline) -> String {
    let connect: Connector = Arc::new(
        |model: Option<&str>, _key: Option<&str>| -> anyhow::Result<Arc<dyn GenerationService>> {
            let answer = match model {
                Some("broken") => "Here is a lovely layout for you!",
                _ => ANSWER,
            };
            Ok(Arc::new(Scripted(answer.to_string())))
        },
    );
    let app = router(ServerState::with_connector(pipeline, connect));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn http_routes_cover_the_flow() {
    let dir = tempdir().unwrap();
    let pipeline = Pipeline::with_store(Settings::default(), ArtifactStore::new(dir.path()));
    let base = spawn_server(pipeline).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({ "status": "ok" }));

    let uploaded = client
        .put(format!("{}/uploads/shop.png", base))
        .body(background_png())
        .send()
        .await
        .unwrap();
    assert_eq!(uploaded.status(), 200);
    let uploaded: Value = uploaded.json().await.unwrap();
    assert_eq!(uploaded["filename"], "shop.png");

    let saved = client
        .post(format!("{}/save_rectangles", base))
        .json(&json!({
            "filename": "shop.png",
            "rectangles": [{"left": 10, "top": 10, "width": 100, "height": 40}],
            "userIntention": "summer sale"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(saved.status(), 200);
    assert_eq!(
        saved.headers()["access-control-allow-origin"],
        "*"
    );
    let saved: Value = saved.json().await.unwrap();
    let saved_image = saved["saved_image"].as_str().unwrap().to_string();
    let id = ArtifactId::parse(&saved_image).unwrap();
    assert_eq!(saved["document"], id.document_name());

    let enriched: Value = client
        .post(format!("{}/enrich", base))
        .json(&json!({ "saved_image": saved_image }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(enriched["element1"][0]["text"], "SALE");
    assert_eq!(enriched["user_intention"], "summer sale");

    let broken = client
        .post(format!("{}/enrich", base))
        .json(&json!({ "saved_image": saved_image, "model": "broken" }))
        .send()
        .await
        .unwrap();
    assert_eq!(broken.status(), 502);

    let composed: Value = client
        .post(format!("{}/compose", base))
        .json(&json!({ "saved_image": saved_image }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(composed["text_nodes"], 1);
    assert_eq!(composed["png"], Value::Null);

    let svg = client
        .get(format!("{}/uploads/{}", base, composed["svg"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(svg.status(), 200);
    assert_eq!(svg.headers()["content-type"], "image/svg+xml");
    assert!(svg.text().await.unwrap().contains("SALE"));
}

#[tokio::test]
async fn http_errors_carry_status() {
    let (_dir, pipeline) = pipeline();
    let base = spawn_server(pipeline).await;
    let client = reqwest::Client::new();

    let outside = client
        .post(format!("{}/save_rectangles", base))
        .json(&json!({
            "filename": "shop.png",
            "rectangles": [{"left": 500, "top": 0, "width": 10, "height": 10}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(outside.status(), 400);
    let body: Value = outside.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("element1"));

    let missing = client
        .get(format!("{}/uploads/nothing.png", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    let not_saved = client
        .post(format!("{}/compose", base))
        .json(&json!({ "saved_image": "shop.png" }))
        .send()
        .await
        .unwrap();
    assert_eq!(not_saved.status(), 400);

    let gif = client
        .put(format!("{}/uploads/anim.gif", base))
        .body(b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(gif.status(), 400);
}
