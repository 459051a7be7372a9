//! Family management commands.

use clap::Subcommand;
use lectio_core::battle::{FamilyBattle, FamilyRecord};
use lectio_core::storage::Store;

#[derive(Subcommand)]
pub enum FamilyAction {
    /// Create a family record
    Add {
        /// Family name
        name: String,
    },
    /// List families (decoded battle state included)
    List,
    /// Turn family battles on with a fresh zeroed history
    EnableBattle {
        /// Family ID
        id: String,
    },
}

pub fn run(action: FamilyAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open()?;

    match action {
        FamilyAction::Add { name } => {
            let id = store.add_family(&name)?;
            println!("Family created: {id}");
        }
        FamilyAction::List => {
            let mut decoded = Vec::new();
            for row in store.list_family_rows()? {
                match FamilyRecord::decode(&row) {
                    Ok(record) => decoded.push(record),
                    Err(e) => eprintln!("warning: family {} is malformed: {e}", row.id),
                }
            }
            println!("{}", serde_json::to_string_pretty(&decoded)?);
        }
        FamilyAction::EnableBattle { id } => {
            let battle = FamilyBattle {
                enabled: true,
                history: Some(Default::default()),
                ..Default::default()
            };
            store.write_family_battle(&id, &battle)?;
            println!("Family {id} battle enabled");
        }
    }
    Ok(())
}
