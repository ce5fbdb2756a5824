use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};
use nif_pgc_converter::{
    error::Result, format_amount, month_name, parse_workbook_file, sample_ledger,
    write_conversion_xlsx, ConversionResult, ConverterConfig, LedgerRow, ManualMappings,
    PeriodDescriptor, PeriodRepository, RowEdits, SavePeriodRequest, SqlitePeriodStore,
    TrialBalanceConverter,
};
use std::path::{Path, PathBuf};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MappingFormat {
    Summary,
    Json,
    Csv,
    Markdown,
}

#[derive(Parser, Debug)]
#[command(name = "nif-pgc", version, about = "Convierte balanzas NIF en estados financieros PGC")]
struct Cli {
    /// JSON configuration file (database path, mapping file, default rate, tolerance)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct PeriodArgs {
    #[arg(long)]
    year: i32,
    /// 1 = January, 12 = December
    #[arg(long)]
    month: u32,
}

impl PeriodArgs {
    fn descriptor(&self) -> Result<PeriodDescriptor> {
        PeriodDescriptor::new(self.year, self.month)
    }
}

#[derive(Args, Debug)]
struct ConversionArgs {
    /// MXN to EUR rate; the configured default when omitted
    #[arg(long)]
    rate: Option<f64>,

    /// JSON object of manual mappings keyed by row id
    #[arg(long)]
    overrides: Option<PathBuf>,

    /// JSON file with a list of row edits applied before converting
    #[arg(long)]
    edits: Option<PathBuf>,

    /// Write the three-sheet xlsx report here
    #[arg(long)]
    export: Option<PathBuf>,

    /// Print the full conversion result as JSON instead of the summary
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a trial balance (xlsx, xls or csv)
    Convert {
        file: PathBuf,
        #[arg(long, requires = "month")]
        year: Option<i32>,
        #[arg(long, requires = "year")]
        month: Option<u32>,
        #[command(flatten)]
        conversion: ConversionArgs,
    },
    /// Convert a trial balance and store it as an approved period
    Save {
        file: PathBuf,
        #[command(flatten)]
        period: PeriodArgs,
        #[command(flatten)]
        conversion: ConversionArgs,
    },
    /// Recalculate a stored period
    Load {
        #[command(flatten)]
        period: PeriodArgs,
        #[command(flatten)]
        conversion: ConversionArgs,
    },
    /// List stored periods, most recent first
    List,
    /// Delete a stored period
    Delete {
        #[command(flatten)]
        period: PeriodArgs,
    },
    /// Show the NIF to PGC mapping table
    Mapping {
        #[arg(long, value_enum, default_value = "summary")]
        format: MappingFormat,
    },
    /// Convert the built-in demonstration trial balance
    Sample {
        #[command(flatten)]
        conversion: ConversionArgs,
    },
    /// Print the effective configuration, or its JSON schema
    Config {
        #[arg(long)]
        schema: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = ConverterConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Convert {
            file,
            year,
            month,
            conversion,
        } => {
            let period = match (year, month) {
                (Some(year), Some(month)) => Some(PeriodDescriptor::new(year, month)?),
                _ => None,
            };
            let rows = parse_workbook_file(&file)?;
            let (result, _, _) = run_conversion(&config, rows, ManualMappings::new(), &conversion, period)?;
            report(&result, &conversion, config.balance_tolerance)?;
        }

        Command::Save {
            file,
            period,
            conversion,
        } => {
            let period = period.descriptor()?;
            let rows = parse_workbook_file(&file)?;
            let (result, rows, manual_mappings) =
                run_conversion(&config, rows, ManualMappings::new(), &conversion, Some(period))?;
            report(&result, &conversion, config.balance_tolerance)?;

            result
                .save_readiness_with_tolerance(config.balance_tolerance)
                .ensure_ready()?;

            let mut store = SqlitePeriodStore::open(&config.database_path)?;
            store.save_period(&SavePeriodRequest {
                period,
                exchange_rate: result.metadata.exchange_rate,
                rows,
                manual_mappings,
                filename: file_name(&file),
                uploaded_at: chrono::Utc::now().to_rfc3339(),
            })?;
            println!("Periodo {} guardado en {}", period, config.database_path.display());
        }

        Command::Load { period, conversion } => {
            let period = period.descriptor()?;
            let store = SqlitePeriodStore::open(&config.database_path)?;
            let Some(stored) = store.load_period(period)? else {
                println!("No hay datos guardados para {}", period);
                return Ok(());
            };

            let conversion = ConversionArgs {
                rate: conversion.rate.or(Some(stored.period.exchange_rate)),
                ..conversion
            };
            let (result, _, _) = run_conversion(
                &config,
                stored.rows,
                stored.manual_mappings,
                &conversion,
                Some(period),
            )?;
            report(&result, &conversion, config.balance_tolerance)?;
        }

        Command::List => {
            let store = SqlitePeriodStore::open(&config.database_path)?;
            let periods = store.list_periods()?;
            if periods.is_empty() {
                println!("No hay periodos guardados");
            }
            for summary in periods {
                let record = &summary.period;
                println!(
                    "{}  {:<10} {:>5} lineas  TC {}  {}  {}",
                    record.period_key,
                    month_name(record.month).unwrap_or("?"),
                    summary.row_count,
                    record.exchange_rate,
                    record.filename.as_deref().unwrap_or("-"),
                    record.uploaded_at
                );
            }
        }

        Command::Delete { period } => {
            let period = period.descriptor()?;
            let mut store = SqlitePeriodStore::open(&config.database_path)?;
            if store.delete_period(period)? {
                println!("Periodo {} eliminado", period);
            } else {
                println!("No hay datos guardados para {}", period);
            }
        }

        Command::Mapping { format } => {
            let converter = TrialBalanceConverter::from_config(&config)?;
            let table = converter.table();
            match format {
                MappingFormat::Json => println!("{}", table.to_json()?),
                MappingFormat::Csv => print!("{}", table.to_csv()?),
                MappingFormat::Markdown => print!("{}", table.to_markdown()),
                MappingFormat::Summary => {
                    let metadata = table.metadata();
                    println!("Cuentas mapeadas: {}", metadata.total_mappings);
                    for (grupo, count) in &metadata.groups {
                        println!("  {:<22} {}", grupo, count);
                    }
                }
            }
        }

        Command::Sample { conversion } => {
            let (result, _, _) =
                run_conversion(&config, sample_ledger(), ManualMappings::new(), &conversion, None)?;
            report(&result, &conversion, config.balance_tolerance)?;
        }

        Command::Config { schema } => {
            if schema {
                println!("{}", ConverterConfig::schema_as_json()?);
            } else {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Applies the optional overrides and edits files, then converts. Returns the edited rows and
/// mappings alongside the result so they can be persisted as shown.
fn run_conversion(
    config: &ConverterConfig,
    rows: Vec<LedgerRow>,
    mut manual_mappings: ManualMappings,
    args: &ConversionArgs,
    period: Option<PeriodDescriptor>,
) -> Result<(ConversionResult, Vec<LedgerRow>, ManualMappings)> {
    if let Some(path) = &args.overrides {
        let extra: ManualMappings = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        info!("Loaded {} manual mappings from {}", extra.len(), path.display());
        manual_mappings.extend(extra);
    }

    let (rows, manual_mappings) = match &args.edits {
        Some(path) => {
            let edits = RowEdits::from_json_str(&std::fs::read_to_string(path)?)?;
            let edited = edits.apply(&rows, &manual_mappings)?;
            (edited.rows, edited.manual_mappings)
        }
        None => (rows, manual_mappings),
    };

    let converter = TrialBalanceConverter::from_config(config)?;
    let rate = args.rate.unwrap_or(config.default_exchange_rate);
    let result = converter.convert(&rows, rate, &manual_mappings, period)?;
    Ok((result, rows, manual_mappings))
}

fn report(result: &ConversionResult, args: &ConversionArgs, tolerance: f64) -> Result<()> {
    if let Some(path) = &args.export {
        write_conversion_xlsx(result, path)?;
        info!("Report written to {}", path.display());
    }

    if args.json {
        println!("{}", result.to_json()?);
    } else {
        print_summary(result, tolerance);
    }
    Ok(())
}

/// `tolerance` must be the one the `save` gate uses.
fn print_summary(result: &ConversionResult, tolerance: f64) {
    let meta = &result.metadata;
    let sheet = &result.balance_sheet;
    let pnl = &result.pnl;

    if let Some(period) = meta.period {
        println!(
            "Periodo: {} {}",
            month_name(period.month).unwrap_or("?"),
            period.year
        );
    }
    println!("Tipo de cambio: {}", meta.exchange_rate);
    println!(
        "Lineas: {} ({} analizadas, {} de resumen, {} sin mapear, {} manuales)",
        meta.row_count,
        meta.analyzed_row_count,
        meta.summary_excluded_count,
        meta.unmapped_count,
        meta.manual_mapping_count
    );
    println!("Cobertura: {:.1}%", meta.mapped_coverage_pct);
    println!();

    println!("{:<24} {:>18} {:>16}", "Balance", "MXN", "EUR");
    for group in &sheet.groups {
        println!(
            "{:<24} {:>18} {:>16}",
            group.group.label(),
            format_amount(group.total_mxn),
            format_amount(group.total_eur)
        );
    }
    println!(
        "{:<24} {:>18} {:>16}",
        "Total Activo",
        format_amount(sheet.total_activo_mxn),
        format_amount(sheet.total_activo_eur)
    );
    println!(
        "{:<24} {:>18} {:>16}",
        "Total Pasivo + PN",
        format_amount(sheet.adjusted_total_pasivo_pn_mxn),
        format_amount(sheet.adjusted_total_pasivo_pn_eur)
    );
    if let Some(plug) = &sheet.auto_result_line {
        println!(
            "  incluye {} {}: {} MXN",
            plug.pgc_code,
            plug.pgc_name,
            format_amount(plug.total_mxn)
        );
    }
    println!();

    println!("{:<24} {:>18} {:>16}", "Cuenta de resultados", "MXN", "EUR");
    for (label, mxn, eur) in [
        ("Ingresos", pnl.ingresos_mx, pnl.ingresos_eur),
        ("Gastos", pnl.gastos_mx, pnl.gastos_eur),
        ("Resultado explotacion", pnl.resultado_explotacion_mx, pnl.resultado_explotacion_eur),
        ("Resultado financiero", pnl.resultado_financiero_mx, pnl.resultado_financiero_eur),
        ("Otros resultados", pnl.otros_resultados_mx, pnl.otros_resultados_eur),
        ("Resultado antes imp.", pnl.resultado_antes_impuestos_mx, pnl.resultado_antes_impuestos_eur),
    ] {
        println!("{:<24} {:>18} {:>16}", label, format_amount(mxn), format_amount(eur));
    }
    println!();

    let validations = &result.validations;
    println!(
        "Dif. balanza inicial: {}  final: {}",
        format_amount(validations.trial_balance_initial_difference),
        format_amount(validations.trial_balance_final_difference)
    );
    for row in &validations.unmapped_rows {
        warn!("Sin mapear: {} {}", row.row.code, row.row.name);
    }

    println!("Estado: {}", readiness_status(result, tolerance));
}

fn readiness_status(result: &ConversionResult, tolerance: f64) -> &'static str {
    result.save_readiness_with_tolerance(tolerance).message()
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
