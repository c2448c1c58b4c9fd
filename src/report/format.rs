//! Formatted terminal output for two-point and form-factor analyses.

use crate::app::pipeline::{FormFactorAnalysis, SeriesSummary, ThreepAnalysis, TwopAnalysis};
use crate::domain::ObservableArray;

/// Full two-point report: configuration, effective mass table and fits.
pub fn format_twop_report(analysis: &TwopAnalysis) -> String {
    let mut out = String::new();

    out.push_str("=== lqcdjk - two-point analysis ===\n");
    out.push_str(&format!(
        "Particle: {:?} | bins={} | T={}\n",
        analysis.particle, analysis.bin_num, analysis.time_extent
    ));

    out.push_str("\nEffective mass:\n");
    out.push_str(&format_series(&analysis.meff));

    let plateau = &analysis.plateau;
    out.push_str(&format!(
        "\nPlateau fit {}:\n- mEff = {}\n- chi2/dof = {}\n",
        plateau.window,
        fmt_obs(&plateau.value),
        fmt_obs(&plateau.chi_sq)
    ));

    if let Some(exp) = &analysis.exponential {
        out.push_str(&format!("\n{} {}:\n", capitalize(exp.method.display_name()), exp.window));
        for (k, p) in exp.params.iter().enumerate() {
            out.push_str(&format!("- p{k} = {}\n", fmt_obs(p)));
        }
        out.push_str(&format!("- E0 = {}\n", fmt_obs(&exp.energy)));
        out.push_str(&format!("- chi2/dof = {}\n", fmt_obs(&exp.chi_sq)));
    }

    out
}

const SPECTRUM_LABELS: [&str; 4] = ["c0", "c1", "E0", "E1"];
const AMPLITUDE_LABELS: [&str; 3] = ["a00", "a01", "a11"];

/// Two-state spectrum followed by one block per three-point fit.
pub fn format_threep_report(analysis: &ThreepAnalysis) -> String {
    let mut out = String::new();

    out.push_str("=== lqcdjk - three-point analysis ===\n");
    out.push_str(&format!("bins={} | T={}\n", analysis.bin_num, analysis.time_extent));

    let spectrum = &analysis.spectrum;
    out.push_str(&format!("\nTwo-state two-point fit {}:\n", spectrum.window));
    for (label, p) in SPECTRUM_LABELS.iter().zip(&spectrum.params) {
        out.push_str(&format!("- {label} = {}\n", fmt_obs(p)));
    }
    out.push_str(&format!("- chi2/dof = {}\n", fmt_obs(&spectrum.chi_sq)));

    for fit in &analysis.fits {
        let tsinks: Vec<String> = fit.curves.iter().map(|c| c.tsink.to_string()).collect();
        out.push_str(&format!(
            "\nThree-point fit {} (neglect {}, tsink {}):\n",
            fit.window,
            fit.neglect,
            tsinks.join(",")
        ));
        for (label, a) in AMPLITUDE_LABELS.iter().zip(&fit.amplitudes) {
            out.push_str(&format!("- {label} = {}\n", fmt_obs(a)));
        }
        out.push_str(&format!("- chi2/dof = {}\n", fmt_obs(&fit.chi_sq)));
    }

    out
}

/// One table per Q² group with both form factors and SVD diagnostics.
pub fn format_form_factor_report(analysis: &FormFactorAnalysis) -> String {
    let [a, b] = &analysis.labels;
    let mut out = String::new();

    out.push_str("=== lqcdjk - form-factor decomposition ===\n");
    out.push_str(&format!("Kind: {:?}\n\n", analysis.kind));

    out.push_str(
        format!(
            "{:>5} {:>4} {:>24} {:>24} {:>5} {:>10}\n",
            "Q2", "n_p", a, b, "rank", "cond"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<5} {:-<4} {:-<24} {:-<24} {:-<5} {:-<10}", "", "", "", "", "", "").trim_end());
    out.push('\n');

    for group in &analysis.groups {
        let flag = if group.diagnostics.low_confidence() { " !" } else { "" };
        out.push_str(
            format!(
                "{:>5} {:>4} {:>24} {:>24} {:>5} {:>10.3e}{flag}\n",
                group.qsq,
                group.momentum_num,
                fmt_obs(&group.form_factors[0]),
                fmt_obs(&group.form_factors[1]),
                group.diagnostics.rank,
                group.diagnostics.condition_number,
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out
}

fn format_series(series: &SeriesSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:>4} {:>14} {:>14}\n", "t", "mean", "error"));
    for ((t, m), e) in series.ts.iter().zip(&series.mean).zip(&series.error) {
        if m.is_nan() {
            continue;
        }
        out.push_str(&format!("{:>4} {m:>14.6e} {e:>14.6e}\n", *t as usize));
    }
    out
}

fn fmt_obs(obs: &ObservableArray) -> String {
    format!("{:.6} +/- {:.6}", obs.mean, obs.error)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
