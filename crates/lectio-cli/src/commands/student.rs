//! Student management commands.

use clap::Subcommand;
use lectio_core::storage::{Store, StudentInput};

#[derive(Subcommand)]
pub enum StudentAction {
    /// Create a student record
    Add {
        /// Student display name
        name: String,
        /// Owning entity (e.g. diocese) key
        #[arg(long)]
        entity: String,
        /// School key within the entity
        #[arg(long)]
        school: String,
        /// Family to link to
        #[arg(long)]
        family_id: Option<String>,
    },
    /// List students
    List,
    /// Get one student record
    Get {
        /// Student ID
        id: String,
    },
    /// Link a student to a family (or unlink with no family id)
    Link {
        /// Student ID
        id: String,
        /// Family ID; omit to unlink
        family_id: Option<String>,
    },
    /// Set the student-side battle opt-in flag
    OptIn {
        /// Student ID
        id: String,
        /// Opt in (true) or out (false)
        #[arg(long)]
        enabled: bool,
    },
}

pub fn run(action: StudentAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open()?;

    match action {
        StudentAction::Add {
            name,
            entity,
            school,
            family_id,
        } => {
            let id = store.add_student(&StudentInput {
                entity,
                school,
                name,
                family_id,
            })?;
            println!("Student created: {id}");
            let student = store.get_student(&id)?;
            println!("{}", serde_json::to_string_pretty(&student)?);
        }
        StudentAction::List => {
            let students = store.list_students()?;
            println!("{}", serde_json::to_string_pretty(&students)?);
        }
        StudentAction::Get { id } => {
            let student = store
                .get_student(&id)?
                .ok_or_else(|| format!("student not found: {id}"))?;
            println!("{}", serde_json::to_string_pretty(&student)?);
        }
        StudentAction::Link { id, family_id } => {
            store.set_student_family(&id, family_id.as_deref())?;
            println!("Student {id} linked to {}", family_id.as_deref().unwrap_or("(none)"));
        }
        StudentAction::OptIn { id, enabled } => {
            store.set_battle_enabled(&id, enabled)?;
            println!("Student {id} battle opt-in: {enabled}");
        }
    }
    Ok(())
}
