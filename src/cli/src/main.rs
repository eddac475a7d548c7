use clap::{command, Parser, Subcommand};

use fetcher::{FetchTree, SqlCompiler, TreeBuilder};
use schema::{EntityDef, RelationDef, Schema, SqlType};

#[derive(Parser)]
#[command(name = "fetcher-cli", version = "0.0.1")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prints the SQL that installs `safe_create_fn` and every
    /// `execute_if_exists_n<N>` helper.
    InstallMigrations,

    /// Compiles a fetch tree against the built-in demo schema (Author/Book)
    /// and prints the resulting SQL.
    Compile {
        /// Root entity name ("Author" or "Book").
        entity: String,
        /// Names of relations to nest as data instead of ids.
        #[arg(long = "with")]
        nested: Vec<String>,
    },
}

/// A small Author/Book schema used only to demonstrate the compiler from
/// the command line; real callers build their own via [`Schema::builder`].
fn demo_schema() -> Schema {
    Schema::builder()
        .entity(
            EntityDef::new("Author", "public.authors", vec!["id".to_string()])
                .column("name", SqlType::Text)
                .relation(RelationDef::one_to_many("books", "Book", "author_id")),
        )
        .entity(
            EntityDef::new("Book", "public.books", vec!["id".to_string()])
                .column("title", SqlType::Text)
                .relation(RelationDef::many_to_one("author", "Author", "author_id"))
                .with_relation_id("author", "authorId"),
        )
        .build()
        .expect("demo schema is internally consistent")
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::InstallMigrations => {
            println!("{}", migrations::install_sql());
        }

        Commands::Compile { entity, nested } => {
            let schema = demo_schema();
            let mut fetch = FetchTree::new(&entity);
            for child in nested {
                fetch = fetch.with(FetchTree::new(child));
            }

            match TreeBuilder::build(&schema, &fetch).and_then(|tree| SqlCompiler::compile(&schema, &tree)) {
                Ok(sql) => println!("{sql}"),
                Err(e) => eprintln!("Error: {e}"),
            }
        }
    }
}
