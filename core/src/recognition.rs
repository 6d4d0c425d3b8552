use serde::{Deserialize, Serialize};

/// One food item the analyzer picked out of a description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodItem {
    pub name: String,
    pub calories: f64,
}

impl FoodItem {
    /// Calories as a whole number for the food log.
    #[must_use]
    pub fn logged_calories(&self) -> i64 {
        self.calories.round().max(0.0) as i64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodRecognition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    pub food_items: Vec<FoodItem>,
    pub total_calories: f64,
}

/// Raw analyzer output. Models answer with either `foodItems` or `items`
/// and sometimes leave out the total.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisPayload {
    #[serde(default, alias = "items")]
    food_items: Option<Vec<RawItem>>,
    #[serde(default)]
    total_calories: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    name: Option<String>,
    calories: Option<f64>,
}

fn raw_to_item(raw: RawItem) -> Option<FoodItem> {
    let name = raw.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())?;
    let calories = raw.calories.filter(|c| c.is_finite() && *c >= 0.0)?;
    Some(FoodItem { name, calories })
}

/// Parse the JSON object returned by the analysis model.
///
/// Items without a name or with an unusable calorie value are dropped.
/// When the model omits `totalCalories`, the item calories are summed.
pub fn parse_analysis(
    content: &str,
    transcript: Option<String>,
) -> Result<FoodRecognition, serde_json::Error> {
    let payload: AnalysisPayload = if content.trim().is_empty() {
        AnalysisPayload::default()
    } else {
        serde_json::from_str(content)?
    };

    let food_items: Vec<FoodItem> = payload
        .food_items
        .unwrap_or_default()
        .into_iter()
        .filter_map(raw_to_item)
        .collect();
    let total_calories = payload
        .total_calories
        .filter(|t| t.is_finite() && *t >= 0.0)
        .unwrap_or_else(|| food_items.iter().map(|i| i.calories).sum());

    Ok(FoodRecognition {
        transcript,
        food_items,
        total_calories,
    })
}
