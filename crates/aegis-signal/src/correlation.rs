//! Cross-symbol correlation analysis on 15m close returns.

use std::collections::BTreeMap;

use aegis_core::Timeframe;
use aegis_feed::CandleSet;

/// Returns over the trailing window.
fn returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 10 {
        return None;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];

    let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
    let (ma, mb) = (mean(a), mean(b));

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - ma;
        let db = b[i] - mb;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

/// Average absolute correlation of each symbol against the rest of the
/// basket, on 15m returns.
pub fn analyze_market_correlations(symbols: &[String], candles: &CandleSet) -> BTreeMap<String, f64> {
    let mut series: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for symbol in symbols {
        if let Some(m15) = candles.get(symbol).and_then(|tf| tf.get(&Timeframe::M15)) {
            let closes: Vec<f64> = m15.iter().map(|c| c.close.to_f64()).collect();
            series.insert(symbol.as_str(), returns(&closes));
        }
    }

    let mut result = BTreeMap::new();
    for (symbol, own) in &series {
        let mut correlations = Vec::new();
        for (other, theirs) in &series {
            if symbol == other {
                continue;
            }
            if let Some(corr) = pearson(own, theirs) {
                correlations.push(corr.abs());
            }
        }
        if !correlations.is_empty() {
            let avg = correlations.iter().sum::<f64>() / correlations.len() as f64;
            result.insert((*symbol).to_string(), avg);
        }
    }
    result
}

/// Correlation contribution to the score, 0-10 points.
///
/// Moderate correlation with the market confirms the move; near-total
/// correlation means no independent information.
pub fn correlation_score(
    correlations: &BTreeMap<String, f64>,
    symbol: &str,
) -> (u32, Vec<String>) {
    let Some(avg) = correlations.get(symbol) else {
        return (0, vec!["no correlation data".to_string()]);
    };

    if *avg < 0.3 {
        (
            10,
            vec![format!("low market correlation ({avg:.2}), independent move")],
        )
    } else if *avg <= 0.7 {
        (
            6,
            vec![format!("moderate market correlation ({avg:.2})")],
        )
    } else {
        (
            2,
            vec![format!("high market correlation ({avg:.2}), crowded move")],
        )
    }
}
