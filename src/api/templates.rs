//! Prompt templates wrapped around user requests for image edits

const RETOUCH_TEMPLATE: &str = r#"You are an expert photo editor AI. Apply a localized, realistic edit to the provided image.
User Request: "{user_prompt}"
Edit Location: Focus around pixel coordinates (x: {x}, y: {y}).

Guidelines:
- Keep the edit natural and seamless.
- Do not change the rest of the image outside the localized area.
- Accept standard skin tone changes (tan, lighter, darker).
- Refuse requests that change fundamental race/ethnicity.

Return only the final edited image."#;

const FILTER_TEMPLATE: &str = r#"You are an expert photo editor AI. Apply a stylistic filter to the entire image.
Filter Request: "{user_prompt}"

Guidelines:
- Adjust colors/style without changing composition.
- Do not change a person's race/ethnicity.

Return only the final filtered image."#;

const ADJUST_TEMPLATE: &str = r#"You are an expert photo editor AI. Apply a global adjustment to the image.
Adjustment Request: "{user_prompt}"

Guidelines:
- The whole image should be adjusted and remain photorealistic.
- Accept standard skin tone changes (tan, lighter, darker).
- Refuse requests that change fundamental race/ethnicity.

Return only the final adjusted image."#;

const COMPOSE_TEMPLATE: &str = r#"You are an expert photo compositor AI. Transform or compose the provided image based on the user's creative request.
User Request: "{user_prompt}"

Guidelines:
- Creatively transform, remix, or compose the image as requested.
- You may combine elements, change style, add artistic effects, or create variations.
- Maintain high quality and coherent composition.
- Be creative while respecting the user's intent.

Return only the final composed image."#;

pub fn retouch(user_prompt: &str, x: i64, y: i64) -> String {
    // coordinates first so braces inside the user prompt stay literal
    RETOUCH_TEMPLATE
        .replace("{x}", &x.to_string())
        .replace("{y}", &y.to_string())
        .replace("{user_prompt}", user_prompt)
}

pub fn filter(user_prompt: &str) -> String {
    FILTER_TEMPLATE.replace("{user_prompt}", user_prompt)
}

pub fn adjust(user_prompt: &str) -> String {
    ADJUST_TEMPLATE.replace("{user_prompt}", user_prompt)
}

pub fn compose(user_prompt: &str) -> String {
    COMPOSE_TEMPLATE.replace("{user_prompt}", user_prompt)
}
