use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use shared::{
    domain::{StageId, WellId, WellKind},
    order::StageOrder,
    protocol::{NewStage, NewWell},
};
use storage::{ReorderOutcome, StageInsertOutcome, Storage, WellInsertOutcome};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/stages.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateWell {
        name: String,
        #[arg(long, default_value = "onshore")]
        kind: String,
        #[arg(long, default_value = "")]
        team: String,
        /// Stage names, in order.
        #[arg(long = "stage")]
        stages: Vec<String>,
    },
    AddStage {
        well_id: i64,
        name: String,
        #[arg(long)]
        position: Option<i64>,
    },
    ListStages {
        well_id: i64,
    },
    DeleteStage {
        stage_id: i64,
    },
    /// Applies a complete stage order, e.g. `reorder 4 12 10 11`.
    Reorder {
        well_id: i64,
        #[arg(required = true)]
        order: Vec<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateWell {
            name,
            kind,
            team,
            stages,
        } => {
            let Some(kind) = WellKind::parse(&kind) else {
                bail!("unknown well kind '{kind}'; expected onshore or offshore");
            };
            let well = NewWell {
                kind,
                team,
                name,
                start_date: None,
                stages: stages
                    .into_iter()
                    .map(|stage_name| NewStage {
                        stage_name: Some(stage_name),
                        ..NewStage::default()
                    })
                    .collect(),
            };
            match storage.create_well(&well).await? {
                WellInsertOutcome::Created(well_id) => println!("created well_id={}", well_id.0),
                WellInsertOutcome::PositionTaken(position) => {
                    bail!("position {position} is assigned to more than one stage")
                }
            }
        }
        Command::AddStage {
            well_id,
            name,
            position,
        } => {
            let stage = NewStage {
                stage_name: Some(name),
                position,
                ..NewStage::default()
            };
            match storage.create_stage(WellId(well_id), &stage).await? {
                StageInsertOutcome::Created(stage_id) => {
                    println!("created stage_id={}", stage_id.0)
                }
                StageInsertOutcome::UnknownWell => bail!("well {well_id} not found"),
                StageInsertOutcome::PositionTaken(position) => {
                    bail!("position {position} is already used in well {well_id}")
                }
            }
        }
        Command::ListStages { well_id } => {
            for stage in storage.list_stages(WellId(well_id)).await? {
                println!(
                    "{:>4}  stage_id={}  {}  [{}]",
                    stage.position,
                    stage.stage_id.0,
                    stage.stage_name.as_deref().unwrap_or("-"),
                    stage.progress
                );
            }
        }
        Command::DeleteStage { stage_id } => {
            if !storage.delete_stage(StageId(stage_id)).await? {
                bail!("stage {stage_id} not found");
            }
            println!("deleted stage_id={stage_id}");
        }
        Command::Reorder { well_id, order } => {
            let order = StageOrder::new(order.into_iter().map(StageId).collect())?;
            match storage.reorder_stages(WellId(well_id), &order).await? {
                ReorderOutcome::Applied => println!("reordered {} stages", order.len()),
                ReorderOutcome::UnknownWell => bail!("well {well_id} not found"),
                ReorderOutcome::MembershipMismatch { updated, submitted } => bail!(
                    "order does not match the well's stages ({updated} of {submitted} ids belong to well {well_id}); nothing changed"
                ),
                ReorderOutcome::PartialOrder {
                    stage_count,
                    submitted,
                } => bail!(
                    "order lists {submitted} of {stage_count} stages; every stage must be included"
                ),
            }
        }
    }

    Ok(())
}
