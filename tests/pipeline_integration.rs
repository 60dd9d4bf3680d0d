use geocorr::stats::Correlation;
use geocorr::{AnalysisConfig, AnalysisPipeline, CorrelationOutcome};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}

fn election_config(dir: &TempDir) -> AnalysisConfig {
    let votes = write(
        dir.path(),
        "votacao.csv",
        "NR_TURNO,NR_VOTAVEL,SG_UF,NM_VOTAVEL,QT_VOTOS\n\
         1,13,SP,LULA,99999\n\
         2,13,SP,LULA,100\n\
         2,13,SP,LULA,100\n\
         2,13,RJ,LULA,80\n\
         2,13,MG,LULA,140\n\
         2,13,BA,LULA,180\n\
         2,22,SP,BOLSONARO,300\n\
         2,22,RJ,BOLSONARO,100\n\
         2,22,MG,BOLSONARO,50\n\
         2,22,BA,BOLSONARO,20\n\
         2,30,SP,OUTRO,7\n",
    );
    let benefits = write(
        dir.path(),
        "bolsa.csv",
        "UF,VALOR PARCELA\n\
         SP,600\n\
         SP,400\n\
         RJ,400\n\
         MG,700\n\
         BA,500\n\
         BA,400\n\
         AM,250\n",
    );

    let config = json!({
        "title": "Votos x Bolsa Família",
        "primary": {
            "source": { "location": votes },
            "filter": [
                { "op": "equals", "column": "NR_TURNO", "value": 2 },
                { "op": "in", "column": "NR_VOTAVEL", "values": [13, 22] }
            ],
            "select": ["SG_UF", "NM_VOTAVEL", "QT_VOTOS"],
            "group_by": ["SG_UF", "NM_VOTAVEL"],
            "sum": ["QT_VOTOS"]
        },
        "secondary": {
            "source": { "location": benefits },
            "group_by": ["UF"],
            "sum": ["VALOR PARCELA"]
        },
        "join": { "left_on": "SG_UF", "right_on": "UF" },
        "correlation": { "by": "NM_VOTAVEL", "x": "QT_VOTOS", "y": "VALOR PARCELA" },
        "output": {
            "rankings": [
                { "label": "SG_UF", "value": "QT_VOTOS", "split_by": "NM_VOTAVEL" },
                { "table": "secondary", "label": "UF", "value": "VALOR PARCELA" }
            ]
        }
    });
    AnalysisConfig::from_json_str(&config.to_string()).unwrap()
}

fn crime_config(dir: &TempDir) -> AnalysisConfig {
    // Two rows per cisp; totals follow recuperacao = roubo / 2 + 10
    let mut csv = String::from("cisp;roubo_veiculo;recuperacao_veiculos;mes\n");
    for cisp in 1..=20 {
        let roubo = cisp * 10;
        let recuperacao = roubo / 2 + 10;
        csv.push_str(&format!("{cisp};{};{};1\n", roubo / 2, recuperacao / 2));
        csv.push_str(&format!(
            "{cisp};{};{};2\n",
            roubo - roubo / 2,
            recuperacao - recuperacao / 2
        ));
    }
    let crimes = write(dir.path(), "ocorrencias.csv", &csv);

    let config = json!({
        "title": "Roubo x Recuperação",
        "primary": {
            "source": { "location": crimes, "delimiter": ";", "encoding": "latin1" },
            "select": ["cisp", "roubo_veiculo", "recuperacao_veiculos"],
            "group_by": ["cisp"],
            "sum": ["roubo_veiculo", "recuperacao_veiculos"]
        },
        "trims": [{ "column": "roubo_veiculo", "percentile": 95 }],
        "correlation": { "x": "roubo_veiculo", "y": "recuperacao_veiculos" },
        "regression": {
            "x": "roubo_veiculo",
            "y": "recuperacao_veiculos",
            "predict_inputs": [400, 500]
        }
    });
    AnalysisConfig::from_json_str(&config.to_string()).unwrap()
}

#[test]
fn test_election_pipeline() {
    let dir = TempDir::new().unwrap();
    let pipeline = AnalysisPipeline::new(election_config(&dir));
    let outcome = pipeline.run().unwrap();

    // 4 states x 2 candidates; the first round and other candidates are filtered out
    assert_eq!(outcome.primary.height(), 8);
    assert_eq!(outcome.secondary.as_ref().unwrap().height(), 5);
    // AM has no votes and is dropped by the join
    assert_eq!(outcome.joined.as_ref().unwrap().height(), 8);
    assert_eq!(outcome.analysed.height(), 8);

    let Some(CorrelationOutcome::ByGroup(groups)) = &outcome.correlation else {
        panic!("expected per-candidate correlation");
    };
    assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["BOLSONARO", "LULA"]);

    // LULA votes are exactly 20% of each state's benefit total
    let lula = groups["LULA"].coefficient().unwrap();
    assert!((lula - 1.0).abs() < 1e-9);
    assert_eq!(groups["LULA"].sample_size(), 4);
    let bolsonaro = groups["BOLSONARO"].coefficient().unwrap();
    assert!((-1.0..=1.0).contains(&bolsonaro));

    assert_eq!(outcome.summaries["QT_VOTOS"].count, 8);
    assert!((outcome.summaries["QT_VOTOS"].max - 300.0).abs() < 1e-9);
    assert!(outcome.regression.is_none());
}

#[test]
fn test_election_join_without_overlap_is_empty() {
    let dir = TempDir::new().unwrap();
    let mut config = election_config(&dir);
    config.correlation = None;
    config.secondary.as_mut().unwrap().filter = vec![geocorr::data::Condition::equals("UF", "AM")];

    let outcome = AnalysisPipeline::new(config).run().unwrap();
    assert_eq!(outcome.secondary.as_ref().unwrap().height(), 1);
    assert_eq!(outcome.analysed.height(), 0);
    assert!(outcome.correlation.is_none());
}

#[test]
fn test_crime_regression_pipeline() {
    let dir = TempDir::new().unwrap();
    let pipeline = AnalysisPipeline::new(crime_config(&dir));
    let outcome = pipeline.run().unwrap();

    assert_eq!(outcome.primary.height(), 20);
    assert!(outcome.joined.is_none());
    // p95 of 10..=200 is 190.5, so only cisp 20 is dropped
    assert_eq!(outcome.analysed.height(), 19);

    match outcome.correlation {
        Some(CorrelationOutcome::Overall(Correlation::Coefficient { r, n, p_value })) => {
            assert!((r - 1.0).abs() < 1e-9);
            assert_eq!(n, 19);
            assert!(p_value.unwrap() < 1e-6);
        }
        other => panic!("unexpected correlation {other:?}"),
    }

    let regression = outcome.regression.as_ref().unwrap();
    assert_eq!(regression.report.test_x.len(), 4);
    assert_eq!(regression.report.train_rows, 15);
    assert!((regression.report.r2.unwrap() - 1.0).abs() < 1e-9);
    assert_eq!(regression.scenarios.len(), 2);
    assert!((regression.scenarios[0].1 - 210.0).abs() < 1e-6);
    assert!((regression.scenarios[1].1 - 260.0).abs() < 1e-6);
}

#[test]
fn test_report_is_written_as_json() {
    let dir = TempDir::new().unwrap();
    let pipeline = AnalysisPipeline::new(crime_config(&dir));
    let outcome = pipeline.run().unwrap();

    let path = dir.path().join("report.json");
    pipeline.write_report(&outcome, &path).unwrap();

    let report: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(report["title"], "Roubo x Recuperação");
    assert_eq!(report["rows"]["primary"], 20);
    assert_eq!(report["rows"]["analysed"], 19);
    assert!(report["rows"]["joined"].is_null());
    assert_eq!(report["correlation"]["scope"], "overall");
    assert_eq!(report["correlation"]["value"]["status"], "coefficient");
    assert_eq!(report["regression"]["test_rows"], 4);
    assert_eq!(report["regression"]["scenarios"][0]["x"], 400.0);
    assert_eq!(report["summaries"]["roubo_veiculo"]["count"], 19);
}

#[test]
fn test_missing_source_names_the_stage() {
    let dir = TempDir::new().unwrap();
    let mut config = crime_config(&dir);
    config.primary.source.location = dir.path().join("absent.csv").to_string_lossy().into_owned();

    let err = AnalysisPipeline::new(config).run().unwrap_err();
    assert!(format!("{err:#}").contains("preparing primary table"));
}

#[test]
fn test_non_numeric_correlation_fails() {
    let dir = TempDir::new().unwrap();
    let mut config = election_config(&dir);
    config.correlation.as_mut().unwrap().x = "SG_UF".into();

    let err = AnalysisPipeline::new(config).run().unwrap_err();
    assert!(format!("{err:#}").contains("SG_UF"));
}

#[test]
fn test_small_table_keeps_model_without_r2() {
    let dir = TempDir::new().unwrap();
    let mut config = crime_config(&dir);
    // Keep five cisps so the default split holds out a single row
    config.primary.filter = vec![geocorr::data::Condition::is_in("cisp", [1i64, 2, 3, 4, 5])];
    config.trims.clear();

    let pipeline = AnalysisPipeline::new(config);
    let outcome = pipeline.run().unwrap();
    let regression = outcome.regression.as_ref().unwrap();
    assert_eq!(regression.report.test_x.len(), 1);
    assert!(regression.report.r2.is_none());
    assert!((regression.scenarios[0].1 - 210.0).abs() < 1e-6);

    let path = dir.path().join("report.json");
    pipeline.write_report(&outcome, &path).unwrap();
    let report: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert!(report["regression"]["r2"].is_null());
    assert!(report["regression"]["r2_undefined"].is_string());
}
