//! Forecast tables over (stream, survey) pairs.
//!
//! Streams are forecast in parallel. Every cell carries its own `Result`, so a failing
//! pair shows up as an error in that cell only and the rest of the table is still filled.
use ahash::RandomState;
use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, ContentArrangement, Row, Table};
use log::{info, warn};
use rayon::prelude::*;
use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    constants::SurveyKey,
    forecast::{
        confusion::calc_star_bg,
        counts::{calc_nstars, CountResults},
        ForecastParams, SurveyTargets,
    },
    gapcast_errors::GapcastError,
    photometry::surveys::SurveyRegistry,
    stream::StreamConfig,
};

/// Forecasts of one stream.
#[derive(Debug)]
pub struct ForecastRow {
    pub stream: String,
    /// Star counts per survey, or the error that prevented using the reference survey
    pub counts: Result<CountResults, GapcastError>,
    /// Background confusion counts per survey
    pub confusion: HashMap<SurveyKey, Result<f64, GapcastError>, RandomState>,
}

impl ForecastRow {
    fn compute(
        stream: &StreamConfig,
        targets: &SurveyTargets,
        registry: &SurveyRegistry,
        params: &ForecastParams,
    ) -> Self {
        let counts = registry
            .get(&stream.reference_survey)
            .and_then(|reference| calc_nstars(stream, &reference, targets, registry, params));
        if let Err(e) = &counts {
            warn!("No star counts for {}: {e}", stream.name);
        }

        let confusion = targets
            .resolve(registry)
            .iter()
            .map(|survey| {
                let res = calc_star_bg(stream, survey, params);
                if let Err(e) = &res {
                    warn!("calc_star_bg {} / {} failed: {e}", stream.name, survey.key);
                }
                (survey.key.clone(), res)
            })
            .collect();

        ForecastRow {
            stream: stream.name.clone(),
            counts,
            confusion,
        }
    }

    pub fn count(&self, survey: &str) -> Option<u64> {
        self.counts.as_ref().ok()?.get(survey)?.as_ref().ok().copied()
    }

    pub fn confusion(&self, survey: &str) -> Option<f64> {
        self.confusion.get(survey)?.as_ref().ok().copied()
    }
}

/// Star counts and confusion counts of several streams in several surveys.
#[derive(Debug)]
pub struct ForecastTable {
    /// Column order
    surveys: Vec<SurveyKey>,
    rows: Vec<ForecastRow>,
}

impl ForecastTable {
    /// Forecast every stream in every target survey.
    ///
    /// Each stream's count in its `reference_survey` must be known and that survey
    /// registered. Confusion counts need the stream's background catalog loaded; without
    /// it only the confusion cells fail.
    pub fn compute(
        streams: &[Arc<StreamConfig>],
        targets: &SurveyTargets,
        registry: &SurveyRegistry,
        params: &ForecastParams,
    ) -> Self {
        let surveys = targets
            .resolve(registry)
            .iter()
            .map(|s| s.key.clone())
            .collect::<Vec<_>>();

        let rows = streams
            .par_iter()
            .map(|stream| ForecastRow::compute(stream, targets, registry, params))
            .collect::<Vec<_>>();

        info!(
            "Forecast table of {} streams x {} surveys",
            rows.len(),
            surveys.len()
        );
        ForecastTable { surveys, rows }
    }

    pub fn surveys(&self) -> &[SurveyKey] {
        &self.surveys
    }

    pub fn rows(&self) -> &[ForecastRow] {
        &self.rows
    }

    pub fn row(&self, stream: &str) -> Option<&ForecastRow> {
        self.rows.iter().find(|r| r.stream == stream)
    }

    pub fn count(&self, stream: &str, survey: &str) -> Option<u64> {
        self.row(stream)?.count(survey)
    }

    pub fn confusion(&self, stream: &str, survey: &str) -> Option<f64> {
        self.row(stream)?.confusion(survey)
    }

    /// Counts of `stream` in column order, `None` where the forecast failed.
    pub fn count_column(&self, stream: &str) -> Vec<Option<u64>> {
        self.surveys
            .iter()
            .map(|s| self.count(stream, s))
            .collect()
    }
}

impl fmt::Display for ForecastTable {
    /// One row per stream, one column per survey; a cell shows the star count and, in
    /// brackets, the background confusion count.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        let mut header = vec![Cell::new("Stream")];
        header.extend(self.surveys.iter().map(Cell::new));
        table.set_header(header);

        for row in &self.rows {
            let mut cells = vec![Cell::new(&row.stream)];
            cells.extend(self.surveys.iter().map(|survey| {
                let count = row
                    .count(survey)
                    .map_or_else(|| "-".to_string(), |n| n.to_string());
                let bg = row
                    .confusion(survey)
                    .map_or_else(|| "-".to_string(), |b| format!("{b:.1}"));
                Cell::new(format!("{count} ({bg})")).set_alignment(CellAlignment::Right)
            }));
            table.add_row(Row::from(cells));
        }

        write!(f, "{table}")
    }
}
