//! Response schema and instructions sent with every extraction call

use serde_json::{json, Value};

/// Instructions for the model
pub const EXTRACTION_INSTRUCTIONS: &str = "\
You extract firearm listings from a marketplace results page.
Return every listing on the page, in the order it appears, as JSON matching the schema.
For each listing give:
- listing_id: the marketplace's identifier for the listing, or null if none is visible
- title: the listing title exactly as shown
- price: the asking price as a number, or 0 when the seller asks for offers
- url: the link to the listing page (relative links are fine)
- description: the listing's description text as shown, or null if there is none
- image_urls: links to the listing's images, or an empty list
- gun: details of the firearm being sold, or null when the listing is not a single firearm
  or the details cannot be determined. manufacturer, model and caliber are required;
  condition is one of new, like_new, used, rounds_fired, unknown; accessories lists
  included extras such as magazines, optics or cases; currency is a three-letter code.
Do not invent listings or details that are not on the page.";

/// JSON schema of the expected response
pub fn listing_page_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "listings": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "listing_id": { "type": ["string", "null"] },
                        "title": { "type": "string" },
                        "price": { "type": ["number", "string"] },
                        "url": { "type": "string" },
                        "description": { "type": ["string", "null"] },
                        "image_urls": {
                            "type": "array",
                            "items": { "type": "string" }
                        },
                        "gun": {
                            "anyOf": [
                                { "type": "null" },
                                {
                                    "type": "object",
                                    "properties": {
                                        "manufacturer": { "type": "string" },
                                        "model": { "type": "string" },
                                        "caliber": { "type": "string" },
                                        "condition": {
                                            "type": "string",
                                            "enum": ["new", "like_new", "used", "rounds_fired", "unknown"]
                                        },
                                        "accessories": {
                                            "type": "array",
                                            "items": { "type": "string" }
                                        },
                                        "price": { "type": ["number", "string", "null"] },
                                        "currency": { "type": ["string", "null"] }
                                    },
                                    "required": ["manufacturer", "model", "caliber", "condition"]
                                }
                            ]
                        }
                    },
                    "required": ["title", "price", "url"]
                }
            }
        },
        "required": ["listings"]
    })
}
