//! Per-symbol bar history indexed by trading day, and the merged timeline
//! used by the cross-symbol day-trading simulator.

use crate::domain::ohlcv::Bar;
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub struct SymbolSeries {
    pub symbol: String,
    pub bars: Vec<Bar>,
    pub date_index: HashMap<NaiveDate, usize>,
}

impl SymbolSeries {
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> Self {
        let date_index = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| (bar.date(), i))
            .collect();
        Self {
            symbol: symbol.into(),
            bars,
            date_index,
        }
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    pub fn get_bar(&self, date: NaiveDate) -> Option<&Bar> {
        self.date_index.get(&date).map(|&i| &self.bars[i])
    }

    pub fn get_bar_index(&self, date: NaiveDate) -> Option<usize> {
        self.date_index.get(&date).copied()
    }

    /// The bar for `date` together with the bar immediately preceding it.
    pub fn with_prior(&self, date: NaiveDate) -> Option<(&Bar, &Bar)> {
        let i = self.get_bar_index(date)?;
        let prev = i.checked_sub(1)?;
        Some((&self.bars[i], &self.bars[prev]))
    }
}

pub fn build_unified_timeline(series: &[SymbolSeries]) -> Vec<NaiveDate> {
    let unique_dates: BTreeSet<NaiveDate> = series
        .iter()
        .flat_map(|s| s.bars.iter().map(Bar::date))
        .collect();
    unique_dates.into_iter().collect()
}
