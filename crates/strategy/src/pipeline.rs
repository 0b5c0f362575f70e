//! Ordered set of indicator cells fed bar by bar.

use chrono::{DateTime, Utc};
use tracing::debug;

use common::Bar;

use crate::indicators::{Field, Indicator, IndicatorSpec, IndicatorValue};

/// Reference to one indicator output inside a frame: a bare index reads the
/// primary value, a table picks a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum InputRef {
    Index(usize),
    Field { index: usize, field: Field },
}

impl InputRef {
    pub fn index(&self) -> usize {
        match *self {
            InputRef::Index(i) | InputRef::Field { index: i, .. } => i,
        }
    }

    pub fn field(&self) -> Field {
        match *self {
            InputRef::Index(_) => Field::Value,
            InputRef::Field { field, .. } => field,
        }
    }
}

/// Indicator values for one accepted bar, all cells formed.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub bar: Bar,
    pub values: Vec<IndicatorValue>,
}

impl Frame {
    pub fn close(&self) -> f64 {
        self.bar.close
    }

    pub fn value(&self, index: usize) -> Option<&IndicatorValue> {
        self.values.get(index)
    }

    pub fn read(&self, input: InputRef) -> Option<f64> {
        self.values.get(input.index())?.field(input.field())
    }

    /// `(upper, middle, lower)` for band-valued cells.
    pub fn band(&self, index: usize) -> Option<(f64, f64, f64)> {
        match self.values.get(index)? {
            IndicatorValue::Band { upper, middle, lower } => Some((*upper, *middle, *lower)),
            _ => None,
        }
    }

    pub fn primaries(&self) -> Vec<f64> {
        self.values.iter().map(IndicatorValue::primary).collect()
    }
}

#[derive(Debug)]
pub struct IndicatorPipeline {
    cells: Vec<Box<dyn Indicator>>,
    last_close_time: Option<DateTime<Utc>>,
    bars_seen: u64,
}

impl IndicatorPipeline {
    pub fn new(cells: Vec<Box<dyn Indicator>>) -> Self {
        Self {
            cells,
            last_close_time: None,
            bars_seen: 0,
        }
    }

    pub fn from_specs(specs: &[IndicatorSpec]) -> Self {
        Self::new(specs.iter().map(IndicatorSpec::build).collect())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.cells.iter().map(|c| c.name()).collect()
    }

    /// Number of bars consumed since construction or the last reset.
    pub fn bars_seen(&self) -> u64 {
        self.bars_seen
    }

    pub fn is_formed(&self) -> bool {
        self.cells.iter().all(|c| c.is_formed())
    }

    /// Whether `update` would consume this bar. Partial bars and bars not
    /// strictly newer than the last accepted one are refused.
    pub fn accepts(&self, bar: &Bar) -> bool {
        bar.is_final && self.last_close_time.map_or(true, |last| bar.close_time > last)
    }

    /// Feed one bar to every cell. Returns a frame once all cells are formed.
    pub fn update(&mut self, bar: &Bar) -> Option<Frame> {
        if !self.accepts(bar) {
            debug!(
                instrument = %bar.instrument,
                close_time = %bar.close_time,
                is_final = bar.is_final,
                "Bar ignored by indicator pipeline"
            );
            return None;
        }
        self.last_close_time = Some(bar.close_time);
        self.bars_seen += 1;

        // Every cell must see the bar, even after one reports unformed.
        let outputs: Vec<Option<IndicatorValue>> =
            self.cells.iter_mut().map(|c| c.update(bar)).collect();
        let values: Option<Vec<IndicatorValue>> = outputs.into_iter().collect();
        values.map(|values| Frame {
            bar: bar.clone(),
            values,
        })
    }

    pub fn reset(&mut self) {
        for cell in &mut self.cells {
            cell.reset();
        }
        self.last_close_time = None;
        self.bars_seen = 0;
    }
}
