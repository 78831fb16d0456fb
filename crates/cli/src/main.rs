use clap::{Parser, Subcommand};
use quote_core::{
    config::core_config_from_env_values, FulfillmentKind, LineItem, Money, NewOffer,
    NewRequest, NonEmptyText, QuotationService, QuoteError, QuoteResult, RequestedItem,
    SqliteProviderDirectory, SqliteSourceDocuments,
};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "quote")]
#[command(about = "Prescription quotation marketplace CLI")]
struct Cli {
    /// Database file (defaults to QUOTE_DATABASE_PATH, then quote_data/quotes.sqlite3)
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and apply the schema
    InitDb,
    /// Register a pharmacy or clinic in the provider directory
    AddProvider {
        name: String,
        /// medication or lab_test
        kind: FulfillmentKind,
        #[arg(long)]
        inactive: bool,
        #[arg(long)]
        unverified: bool,
    },
    /// Register a prescription for a patient
    AddDocument {
        owner_id: Uuid,
        /// Medication name (repeatable)
        #[arg(long = "medication")]
        medications: Vec<String>,
        /// Lab test name (repeatable)
        #[arg(long = "lab-test")]
        lab_tests: Vec<String>,
    },
    /// List active, verified providers of a kind
    Providers { kind: FulfillmentKind },
    /// Ask providers for quotes on a prescription
    CreateRequest {
        patient_id: Uuid,
        document_id: Uuid,
        kind: FulfillmentKind,
        /// Provider ids (comma-separated)
        #[arg(value_delimiter = ',')]
        providers: Vec<Uuid>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Submit a provider's offer
    SubmitOffer {
        request_id: Uuid,
        provider_id: Uuid,
        /// Line items: DESCRIPTION:QUANTITY:UNIT_PRICE for medications, DESCRIPTION:PRICE for lab tests
        #[arg(long = "item", required = true)]
        items: Vec<String>,
        #[arg(long, default_value = "medication")]
        kind: FulfillmentKind,
        #[arg(long)]
        delivery: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        eta: Option<String>,
    },
    /// List offers on a request, cheapest first
    Offers { request_id: Uuid, patient_id: Uuid },
    /// Accept an offer
    Accept {
        request_id: Uuid,
        offer_id: Uuid,
        patient_id: Uuid,
    },
    /// Cancel a request
    Cancel { request_id: Uuid, patient_id: Uuid },
    /// List a patient's requests
    Requests { patient_id: Uuid },
    /// List open requests waiting on a provider
    Inbox { provider_id: Uuid },
}

/// Parses a `--item` value into a line item of `kind`.
fn parse_line_item(kind: FulfillmentKind, spec: &str) -> QuoteResult<LineItem> {
    let parts: Vec<&str> = spec.rsplitn(3, ':').collect();
    let number = |value: &str| {
        value.trim().parse::<f64>().map_err(|_| {
            QuoteError::InvalidInput(format!("'{value}' is not a number in item '{spec}'"))
        })
    };

    match (kind, parts.as_slice()) {
        (FulfillmentKind::Medication, [unit_price, quantity, description]) => {
            let quantity = number(*quantity)?;
            let unit_price = number(*unit_price)?;
            Ok(LineItem::Medication {
                description: NonEmptyText::new(description)?,
                quantity,
                unit_price: Money::new(unit_price)?,
                line_total: Money::new(quantity * unit_price)?,
            })
        }
        (FulfillmentKind::LabTest, [price, description]) => Ok(LineItem::LabTest {
            description: NonEmptyText::new(description)?,
            line_total: Money::new(number(*price)?)?,
        }),
        (FulfillmentKind::LabTest, [price, head, tail]) => Ok(LineItem::LabTest {
            description: NonEmptyText::new(format!("{tail}:{head}"))?,
            line_total: Money::new(number(*price)?)?,
        }),
        _ => Err(QuoteError::InvalidInput(format!(
            "item '{spec}' does not match the {kind} format"
        ))),
    }
}

fn requested_items(names: Vec<String>) -> QuoteResult<Vec<RequestedItem>> {
    names
        .into_iter()
        .map(|name| {
            Ok(RequestedItem {
                name: NonEmptyText::new(name)?,
                instructions: None,
            })
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("Use 'quote --help' for commands");
        return Ok(());
    };

    let cfg = Arc::new(core_config_from_env_values(
        cli.database.or_else(|| std::env::var("QUOTE_DATABASE_PATH").ok()),
        std::env::var("QUOTE_BUSY_TIMEOUT_MS").ok(),
        std::env::var("QUOTE_ALLOCATION_ATTEMPTS").ok(),
    )?);
    let service = QuotationService::with_sqlite_collaborators(cfg);
    service.store().initialise()?;

    match command {
        Commands::InitDb => {
            println!(
                "Database ready at {}",
                service.store().config().database_path().display()
            );
        }
        Commands::AddProvider {
            name,
            kind,
            inactive,
            unverified,
        } => {
            let directory = SqliteProviderDirectory::new(service.store().clone());
            match directory.register_provider(&name, kind, !inactive, !unverified) {
                Ok(p) => println!("Registered {} provider {} with ID: {}", p.kind, p.name, p.id),
                Err(e) => eprintln!("Error registering provider: {}", e),
            }
        }
        Commands::AddDocument {
            owner_id,
            medications,
            lab_tests,
        } => {
            let documents = SqliteSourceDocuments::new(service.store().clone());
            let registered = requested_items(medications).and_then(|meds| {
                documents.register_document(owner_id, &meds, &requested_items(lab_tests)?)
            });
            match registered {
                Ok(id) => println!("Registered source document with ID: {}", id),
                Err(e) => eprintln!("Error registering document: {}", e),
            }
        }
        Commands::Providers { kind } => match service.eligible_providers(kind) {
            Ok(providers) if providers.is_empty() => println!("No eligible providers found."),
            Ok(providers) => {
                for p in providers {
                    println!("ID: {}, Name: {}", p.id, p.name);
                }
            }
            Err(e) => eprintln!("Error listing providers: {}", e),
        },
        Commands::CreateRequest {
            patient_id,
            document_id,
            kind,
            providers,
            notes,
        } => {
            let new = NewRequest {
                requester_id: patient_id,
                source_document_id: document_id,
                kind,
                provider_ids: providers,
                notes,
            };
            match service.create_request(new) {
                Ok(r) => println!("Created request with ID: {} ({} items)", r.id, r.items.len()),
                Err(e) => eprintln!("Error creating request: {}", e),
            }
        }
        Commands::SubmitOffer {
            request_id,
            provider_id,
            items,
            kind,
            delivery,
            notes,
            eta,
        } => {
            let submitted = items
                .iter()
                .map(|spec| parse_line_item(kind, spec))
                .collect::<QuoteResult<Vec<_>>>()
                .and_then(|line_items| {
                    service.submit_offer(NewOffer {
                        request_id,
                        provider_id,
                        line_items,
                        delivery_charge: delivery,
                        notes,
                        estimated_fulfillment_time: eta,
                    })
                });
            match submitted {
                Ok(o) => println!("Submitted offer {} totalling {}", o.id, o.total_amount),
                Err(e) => eprintln!("Error submitting offer: {}", e),
            }
        }
        Commands::Offers {
            request_id,
            patient_id,
        } => match service.list_offers(request_id, patient_id) {
            Ok(offers) if offers.is_empty() => println!("No offers yet."),
            Ok(offers) => {
                for o in offers {
                    println!(
                        "ID: {}, Provider: {}, Total: {}, Status: {}",
                        o.id, o.provider_id, o.total_amount, o.status
                    );
                }
            }
            Err(e) => eprintln!("Error listing offers: {}", e),
        },
        Commands::Accept {
            request_id,
            offer_id,
            patient_id,
        } => match service.accept_offer(request_id, offer_id, patient_id) {
            Ok(a) => println!(
                "Accepted offer {} from provider {}; rejected {} other offer(s)",
                a.accepted.id,
                a.accepted.provider_id,
                a.rejected_offer_ids.len()
            ),
            Err(e) => eprintln!("Error accepting offer: {}", e),
        },
        Commands::Cancel {
            request_id,
            patient_id,
        } => match service.cancel_request(request_id, patient_id) {
            Ok(r) => println!("Cancelled request {}", r.id),
            Err(e) => eprintln!("Error cancelling request: {}", e),
        },
        Commands::Requests { patient_id } => match service.requests_for_patient(patient_id) {
            Ok(views) if views.is_empty() => println!("No requests found."),
            Ok(views) => {
                for v in views {
                    println!(
                        "ID: {}, Kind: {}, Status: {}, Offers: {}, Created: {}",
                        v.request.id,
                        v.request.kind,
                        v.request.status,
                        v.offers.len(),
                        v.request.created_at
                    );
                }
            }
            Err(e) => eprintln!("Error listing requests: {}", e),
        },
        Commands::Inbox { provider_id } => match service.provider_inbox(provider_id) {
            Ok(requests) if requests.is_empty() => println!("Inbox is empty."),
            Ok(requests) => {
                for r in requests {
                    println!("ID: {}, Kind: {}, Items: {}", r.id, r.kind, r.items.len());
                }
            }
            Err(e) => eprintln!("Error reading inbox: {}", e),
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn medication_item_computes_line_total() {
        let item = parse_line_item(FulfillmentKind::Medication, "Amoxicillin 500mg:21:0.5").unwrap();
        assert_eq!(item.quantity(), Some(21.0));
        assert_eq!(item.line_total(), Money::new(10.5).unwrap());
    }

    #[test]
    fn lab_item_allows_colon_in_description() {
        let item = parse_line_item(FulfillmentKind::LabTest, "Panel: lipids:45").unwrap();
        assert_eq!(item.description().as_str(), "Panel: lipids");
        assert_eq!(item.line_total(), Money::new(45.0).unwrap());
    }

    #[test]
    fn malformed_items_are_rejected() {
        assert!(parse_line_item(FulfillmentKind::Medication, "Amoxicillin:3").is_err());
        assert!(parse_line_item(FulfillmentKind::Medication, "Amoxicillin:x:1").is_err());
        assert!(parse_line_item(FulfillmentKind::LabTest, "CBC:-5").is_err());
    }

    #[test]
    fn cli_parses_comma_separated_providers() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let document = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "quote".to_string(),
            "create-request".into(),
            patient.to_string(),
            document.to_string(),
            "lab_test".into(),
            format!("{a},{b}"),
        ])
        .unwrap();
        match cli.command {
            Some(Commands::CreateRequest {
                kind, providers, ..
            }) => {
                assert_eq!(kind, FulfillmentKind::LabTest);
                assert_eq!(providers, vec![a, b]);
            }
            _ => panic!("expected create-request"),
        }
    }
}
