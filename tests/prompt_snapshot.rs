use llm_layout_rust::enrich::{Enricher, GenerationFuture, GenerationRequest, GenerationService};
use llm_layout_rust::settings::Settings;
use llm_layout_rust::{LayoutDocument, Rect};

struct Offline;

impl GenerationService for Offline {
    fn generate(&self, _request: GenerationRequest) -> GenerationFuture {
        Box::pin(async { Err(anyhow::anyhow!("offline")) })
    }
}

#[test]
fn system_prompt_snapshot() {
    let settings = Settings::default();
    let enricher = Enricher::new(Offline, &settings);
    let document =
        LayoutDocument::create(&[Rect::new(10, 10, 100, 40)], "autumn festival").unwrap();
    let prompt = enricher.render_system_prompt(&document).unwrap();
    insta::assert_snapshot!(prompt, @r#"
    You are a graphic designer placing short copy onto a background image.
    The attached image shows the background with numbered outlines. Outline N is the region "elementN".

    Design intention: autumn festival

    Regions:
    - element1: left=10, top=10, width=100, height=40, about 3 characters

    Fonts (pick the one whose tone fits the copy):
    - Arial.ttf: neutral sans-serif for plain, informative copy

    Rules:
    - Write copy for every region. Keep each text close to its character target so it fits on one line.
    - "font" must be one of the font ids listed above.
    - "color" is optional; when given, use [R, G, B] with integers from 0 to 255.
    - Use only the region ids listed above. Do not add other keys.

    Answer with a single JSON object and nothing else, for example:
    {"element1": {"text": "...", "font": "Arial.ttf"}}
    "#);
}

#[test]
fn user_prompt_carries_intention() {
    let enricher = Enricher::new(Offline, &Settings::default());
    let document = LayoutDocument::create(&[Rect::new(0, 0, 10, 10)], "").unwrap();
    assert_eq!(
        enricher.render_user_prompt(&document),
        "Fill every region with copy that suits the background."
    );
}
