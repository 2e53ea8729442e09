//! Pricing Module
//! 属性に応じた乗算ルールで販売価格を算出する。
//! 乗数の適用順序は再現性のため固定:
//! 年齢 → サイズ → 性別 → 特殊属性 → シーズン → クランプ → 丸め

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 年齢区分の閾値（月齢）
const PUPPY_MAX_MONTHS: i64 = 6;
const YOUNG_MAX_MONTHS: i64 = 24;

/// シーズン価格の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalConfig {
    pub enabled: bool,
    #[serde(default)]
    pub high_season_months: Vec<u32>, // 1-12
    #[serde(default)]
    pub low_season_months: Vec<u32>,
    #[serde(default = "one")]
    pub high_multiplier: f64,
    #[serde(default = "one")]
    pub low_multiplier: f64,
}

fn one() -> f64 {
    1.0
}

impl Default for SeasonalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            high_season_months: Vec::new(),
            low_season_months: Vec::new(),
            high_multiplier: 1.0,
            low_multiplier: 1.0,
        }
    }
}

/// 価格ルール（pricing_rules.rule カラムに JSON で保存）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRule {
    #[serde(default = "one")]
    pub puppy_multiplier: f64,
    #[serde(default = "one")]
    pub young_multiplier: f64,
    #[serde(default = "one")]
    pub adult_multiplier: f64,
    /// サイズ名 → 乗数（small/medium/large など）
    #[serde(default)]
    pub size_multipliers: HashMap<String, f64>,
    #[serde(default = "one")]
    pub male_multiplier: f64,
    #[serde(default = "one")]
    pub female_multiplier: f64,
    /// 特殊属性名 → 乗数（入力と両方に存在するものだけ適用）
    #[serde(default)]
    pub special_attributes: HashMap<String, f64>,
    #[serde(default)]
    pub seasonal: SeasonalConfig,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
}

/// 価格算出の入力属性
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PetAttributes {
    pub age_months: i64,
    pub size: Option<String>,
    pub gender: Option<String>,
    #[serde(default)]
    pub special_attributes: Vec<String>,
}

impl PricingRule {
    /// 販売価格を算出。current_month は 1-12。
    pub fn calculate_price(&self, base_price: i64, attrs: &PetAttributes, current_month: u32) -> i64 {
        let mut price = base_price as f64;

        // 1. 年齢区分
        price *= if attrs.age_months < PUPPY_MAX_MONTHS {
            self.puppy_multiplier
        } else if attrs.age_months < YOUNG_MAX_MONTHS {
            self.young_multiplier
        } else {
            self.adult_multiplier
        };

        // 2. サイズ区分
        if let Some(size) = &attrs.size {
            if let Some(m) = self.size_multipliers.get(size) {
                price *= m;
            }
        }

        // 3. 性別（female は大文字小文字を無視して判定、それ以外は male 扱い）
        let is_female = attrs
            .gender
            .as_deref()
            .map(|g| g.eq_ignore_ascii_case("female"))
            .unwrap_or(false);
        price *= if is_female {
            self.female_multiplier
        } else {
            self.male_multiplier
        };

        // 4. 特殊属性（ルールと入力の両方にある属性ごとに乗算）
        for attr in &attrs.special_attributes {
            if let Some(m) = self.special_attributes.get(attr) {
                price *= m;
            }
        }

        // 5. シーズン（enabled で全体をゲート）
        if self.seasonal.enabled {
            if self.seasonal.high_season_months.contains(&current_month) {
                price *= self.seasonal.high_multiplier;
            } else if self.seasonal.low_season_months.contains(&current_month) {
                price *= self.seasonal.low_multiplier;
            }
        }

        // 6. クランプ [min, max]
        if let Some(min) = self.min_price {
            price = price.max(min as f64);
        }
        if let Some(max) = self.max_price {
            price = price.min(max as f64);
        }

        // 7. 最近接整数へ丸め
        price.round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_rule() -> PricingRule {
        let mut size_multipliers = HashMap::new();
        size_multipliers.insert("small".to_string(), 0.9);
        size_multipliers.insert("medium".to_string(), 1.0);
        size_multipliers.insert("large".to_string(), 1.4);
        PricingRule {
            puppy_multiplier: 1.2,
            young_multiplier: 1.0,
            adult_multiplier: 0.8,
            size_multipliers,
            male_multiplier: 1.0,
            female_multiplier: 1.1,
            special_attributes: HashMap::new(),
            seasonal: SeasonalConfig::default(),
            min_price: None,
            max_price: None,
        }
    }

    #[test]
    fn adult_large_female_example() {
        // 3歳 = 36ヶ月 → adult。round(1000 * 0.8 * 1.4 * 1.1) = 1232
        let rule = default_rule();
        let attrs = PetAttributes {
            age_months: 36,
            size: Some("large".to_string()),
            gender: Some("female".to_string()),
            special_attributes: vec![],
        };
        assert_eq!(rule.calculate_price(1000, &attrs, 1), 1232);
    }

    #[test]
    fn gender_match_is_case_insensitive() {
        let rule = default_rule();
        let attrs = PetAttributes {
            age_months: 36,
            size: Some("large".to_string()),
            gender: Some("FEMALE".to_string()),
            special_attributes: vec![],
        };
        assert_eq!(rule.calculate_price(1000, &attrs, 1), 1232);

        // female 以外は male 乗数
        let attrs = PetAttributes {
            age_months: 36,
            size: Some("large".to_string()),
            gender: Some("unknown".to_string()),
            special_attributes: vec![],
        };
        assert_eq!(rule.calculate_price(1000, &attrs, 1), 1120);
    }

    #[test]
    fn age_bracket_thresholds() {
        let rule = default_rule();
        let at = |months| {
            let attrs = PetAttributes {
                age_months: months,
                ..Default::default()
            };
            rule.calculate_price(1000, &attrs, 1)
        };
        assert_eq!(at(5), 1200); // puppy
        assert_eq!(at(6), 1000); // young（閾値ちょうどは上の区分）
        assert_eq!(at(23), 1000);
        assert_eq!(at(24), 800); // adult
    }

    #[test]
    fn special_attributes_multiply_only_when_matched() {
        let mut rule = default_rule();
        rule.special_attributes
            .insert("champion_bloodline".to_string(), 1.5);
        rule.special_attributes.insert("trained".to_string(), 1.2);

        let attrs = PetAttributes {
            age_months: 36,
            special_attributes: vec![
                "champion_bloodline".to_string(),
                "microchipped".to_string(), // ルールに無い → 無視
            ],
            ..Default::default()
        };
        // 1000 * 0.8 * 1.5 = 1200
        assert_eq!(rule.calculate_price(1000, &attrs, 1), 1200);
    }

    #[test]
    fn seasonal_gated_by_enabled_flag() {
        let mut rule = default_rule();
        rule.seasonal = SeasonalConfig {
            enabled: false,
            high_season_months: vec![12],
            low_season_months: vec![7],
            high_multiplier: 1.3,
            low_multiplier: 0.7,
        };
        let attrs = PetAttributes {
            age_months: 36,
            ..Default::default()
        };
        // 無効なら対象月でも適用されない
        assert_eq!(rule.calculate_price(1000, &attrs, 12), 800);

        rule.seasonal.enabled = true;
        assert_eq!(rule.calculate_price(1000, &attrs, 12), 1040); // 800 * 1.3
        assert_eq!(rule.calculate_price(1000, &attrs, 7), 560); // 800 * 0.7
        assert_eq!(rule.calculate_price(1000, &attrs, 3), 800); // どちらでもない月
    }

    #[test]
    fn clamp_applies_after_multipliers() {
        let mut rule = default_rule();
        rule.min_price = Some(900);
        rule.max_price = Some(1100);
        let attrs = PetAttributes {
            age_months: 36,
            ..Default::default()
        };
        assert_eq!(rule.calculate_price(1000, &attrs, 1), 900); // 800 → min 900

        let attrs = PetAttributes {
            age_months: 36,
            size: Some("large".to_string()),
            gender: Some("female".to_string()),
            special_attributes: vec![],
        };
        assert_eq!(rule.calculate_price(1000, &attrs, 1), 1100); // 1232 → max 1100
    }
}
