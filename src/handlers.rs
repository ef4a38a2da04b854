//! Slash-command definitions and interaction handlers.
//!
//! Handlers take a [`Context`] holding the three API clients and the
//! interaction that triggered them. They return [`HandlerError`] and leave
//! reporting to the bot loop.

use tracing::{debug, info};

use crate::components::{
    ActionRow, Button, ButtonStyle, Component, Container, MediaGallery, Section, Separator,
    TextDisplay,
};
use crate::http::{DiscordHttpClient, PROJECT_URL};
use crate::mtg::{Card, CardQuery, MtgClient, Set};
use crate::sra::{Animal, FactCategory, SraClient};
use crate::types::*;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub const NO_CARD_FOUND: &str = "No card found matching the search criteria.";
pub const CARD_NOT_SUPPORTED: &str = "A card was found, but it is not supported for display.";
pub const GENERIC_FAILURE: &str = "Something went wrong while handling this command.";

/// Everything a handler needs to answer an interaction.
#[derive(Clone, Debug)]
pub struct Context {
    pub discord: DiscordHttpClient,
    pub mtg: MtgClient,
    pub sra: SraClient,
}

// ---------------------------------------------------------------------------
// Slash command definitions
// ---------------------------------------------------------------------------

pub fn slash_commands() -> Vec<ApplicationCommand> {
    let everywhere = |builder: ApplicationCommandBuilder| {
        builder
            .contexts([
                InteractionContextType::Guild,
                InteractionContextType::BotDm,
                InteractionContextType::PrivateChannel,
            ])
            .integration_types([
                ApplicationIntegrationType::GuildInstall,
                ApplicationIntegrationType::UserInstall,
            ])
    };

    vec![
        everywhere(
            ApplicationCommandBuilder::chat_input(
                "card_search",
                "Search for a card. See docs.magicthegathering.io/#api_v1cards_list for details.",
            )
            .option(CommandOptionType::String, "name", "nissa, worldwaker|jace|ajani, caller.")
            .option(CommandOptionType::Integer, "cmc", "Converted mana cost.")
            .option(CommandOptionType::String, "color_identity", "W, U, B, R, G.")
            .option(CommandOptionType::String, "types", "Creature, Instant, Enchantment.")
            .option(CommandOptionType::String, "subtypes", "Elf, Goblin, Dragon.")
            .option(
                CommandOptionType::String,
                "game_format",
                "Standard, Modern, Legacy, Vintage, Commander.",
            )
            .option(
                CommandOptionType::String,
                "contains",
                "Filter cards based on whether or not they have a specific field available (like imageUrl).",
            )
            .option(CommandOptionType::Integer, "multiverseid", "The multiverse ID of the card.")
            .option(CommandOptionType::String, "legality", "Legal, Banned or Restricted."),
        )
        .build(),
        everywhere(ApplicationCommandBuilder::chat_input("birdfact", "Get a random bird fact."))
            .build(),
        everywhere(ApplicationCommandBuilder::chat_input(
            "birdfactimage",
            "Get a random bird picture with a fact.",
        ))
        .build(),
    ]
}

// ---------------------------------------------------------------------------
// INTERACTION_CREATE
// ---------------------------------------------------------------------------

pub async fn on_interaction(ctx: &Context, interaction: &Interaction) -> Result<(), HandlerError> {
    match interaction.kind {
        InteractionType::Ping => {
            let pong = InteractionResponse {
                kind: InteractionCallbackType::Pong,
                data: None,
            };
            ctx.discord
                .create_interaction_response(&interaction.id, &interaction.token, &pong)
                .await?;
            Ok(())
        }
        InteractionType::ApplicationCommand => {
            let name = interaction.command_name().ok_or("missing command name")?;
            let user = interaction.author().map(User::tag).unwrap_or_default();
            debug!(command = name, user = %user, interaction = %interaction.id, "slash command");
            match name {
                "card_search" => card_search(ctx, interaction).await,
                "birdfact" => bird_fact(ctx, interaction).await,
                "birdfactimage" => bird_fact_image(ctx, interaction).await,
                other => {
                    info!(command = other, "ignoring unknown command");
                    Ok(())
                }
            }
        }
        _ => Ok(()),
    }
}

/// Deferred ephemeral acknowledgement, one card lookup, then the original
/// response is edited with the result.
async fn card_search(ctx: &Context, interaction: &Interaction) -> Result<(), HandlerError> {
    respond(ctx, interaction, &InteractionResponse::deferred(true)).await?;

    let query = match CardQuery::from_pairs(
        interaction
            .options()
            .iter()
            .filter_map(|opt| Some((opt.name.as_str(), opt.value_string()?))),
    ) {
        Ok(query) => query,
        Err(e) => {
            edit_original(ctx, interaction, MessageBody::new().content(GENERIC_FAILURE), &[]).await?;
            return Err(e.into());
        }
    };

    let card = match ctx.mtg.find_card(&query).await {
        Ok(card) => card,
        Err(e) => {
            edit_original(ctx, interaction, MessageBody::new().content(GENERIC_FAILURE), &[]).await?;
            return Err(e.into());
        }
    };

    let Some(card) = card else {
        return edit_original(ctx, interaction, MessageBody::new().content(NO_CARD_FOUND), &[]).await;
    };

    match card_container(&card) {
        Some(container) => {
            edit_original(ctx, interaction, MessageBody::new().component(container), &[]).await
        }
        None => {
            let json = serde_json::to_vec_pretty(&card)?;
            edit_original(
                ctx,
                interaction,
                MessageBody::new().content(CARD_NOT_SUPPORTED),
                &[FileUpload::new("card.json", json)],
            )
            .await
        }
    }
}

async fn bird_fact(ctx: &Context, interaction: &Interaction) -> Result<(), HandlerError> {
    let response = match ctx.sra.fact(FactCategory::Bird).await {
        Ok(fact) => text_response(fact.fact),
        Err(e) => {
            respond(ctx, interaction, &text_response(GENERIC_FAILURE)).await?;
            return Err(e.into());
        }
    };
    respond(ctx, interaction, &response).await
}

async fn bird_fact_image(ctx: &Context, interaction: &Interaction) -> Result<(), HandlerError> {
    respond(ctx, interaction, &InteractionResponse::deferred(false)).await?;
    let body = match ctx.sra.animal(FactCategory::Bird).await {
        Ok(animal) => MessageBody::new().component(animal_container(&animal)),
        Err(e) => {
            edit_original(ctx, interaction, MessageBody::new().content(GENERIC_FAILURE), &[]).await?;
            return Err(e.into());
        }
    };
    edit_original(ctx, interaction, body, &[]).await
}

async fn respond(
    ctx: &Context,
    interaction: &Interaction,
    response: &InteractionResponse,
) -> Result<(), HandlerError> {
    ctx.discord
        .create_interaction_response(&interaction.id, &interaction.token, response)
        .await?;
    Ok(())
}

async fn edit_original(
    ctx: &Context,
    interaction: &Interaction,
    body: MessageBody,
    files: &[FileUpload],
) -> Result<(), HandlerError> {
    ctx.discord
        .edit_original_interaction_response(
            &interaction.application_id,
            &interaction.token,
            &body,
            files,
        )
        .await?;
    Ok(())
}

fn text_response(text: impl Into<String>) -> InteractionResponse {
    InteractionResponse::message(text)
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// The card as a container, or `None` when it can't be displayed: no name,
/// or neither a text layout nor an image.
pub fn card_container(card: &Card) -> Option<Container> {
    let name = card.name.as_deref()?;

    let mut container = if card.has_text_layout() {
        text_layout(name, card)
    } else {
        Container::new().push(MediaGallery::new().item(card.image_url.as_deref()?))
    };

    if let Some(color) = card.accent_color() {
        container = container.accent_color(color);
    }

    let mut links: Vec<Component> = vec![Button::link("GitHub", PROJECT_URL).into()];
    if let Some(url) = card.gatherer_url() {
        links.push(Button::link("Gatherer", url).into());
    }
    Some(container.push(Separator::new()).push(ActionRow::new(links)))
}

fn text_layout(name: &str, card: &Card) -> Container {
    let title = match card.mana_cost.as_deref() {
        Some(cost) => format!("{} {}", name, cost),
        None => name.to_string(),
    };
    let mut container = Container::new().push(TextDisplay::new(title));

    let type_text = card.type_text();
    match card.set_label() {
        Some(label) => {
            let set_button = Button::new(
                ButtonStyle::Secondary,
                label,
                format!("SET_{}", card.set_name.as_deref().unwrap_or_default()),
            )
            .disabled(true);
            container = container
                .push(Separator::new())
                .push(Section::new(TextDisplay::new(type_text), set_button));
        }
        None if !type_text.is_empty() => {
            container = container.push(Separator::new()).push(TextDisplay::new(type_text));
        }
        None => {}
    }

    let extras = [
        card.text.clone(),
        card.power_toughness(),
        card.loyalty.as_ref().map(|l| format!("[{}]", l)),
    ];
    for text in extras.into_iter().flatten() {
        container = container.push(Separator::new()).push(TextDisplay::new(text));
    }
    container
}

/// `Code`, `Name`, `Block`, `Release Date` and `Online Only` lines.
pub fn set_container(set: &Set) -> Container {
    Container::new().push(TextDisplay::new(set.summary_lines().join("\n")))
}

pub fn animal_container(animal: &Animal) -> Container {
    Container::new()
        .push(MediaGallery::new().item(animal.image.as_str()))
        .push(TextDisplay::new(animal.fact.as_str()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::Scripted;
    use crate::transport::Transport;
    use crate::{mtg, sra};
    use http::StatusCode;
    use serde_json::json;
    use std::sync::Arc;

    const MESSAGE: &str = r#"{"id":"m1","channel_id":"c1"}"#;
    const CALLBACK: &str = "POST /api/v10/interactions/i1/tok/callback";
    const EDIT: &str = "PATCH /api/v10/webhooks/app/tok/messages/@original";

    fn context(transport: Scripted) -> (Context, Arc<Scripted>) {
        let transport = Arc::new(
            transport
                .on("/callback", StatusCode::NO_CONTENT, "")
                .on("/messages/@original", StatusCode::OK, MESSAGE),
        );
        let shared: Arc<dyn Transport> = transport.clone();
        let ctx = Context {
            discord: DiscordHttpClient::new("tok", shared.clone(), 5).unwrap(),
            mtg: MtgClient::new(mtg::DEFAULT_BASE, shared.clone(), 5).unwrap(),
            sra: SraClient::new(sra::DEFAULT_BASE, None, shared, 5).unwrap(),
        };
        (ctx, transport)
    }

    fn command(name: &str, options: serde_json::Value) -> Interaction {
        serde_json::from_value(json!({
            "id": "i1",
            "application_id": "app",
            "type": 2,
            "token": "tok",
            "data": { "id": "c1", "name": name, "options": options },
            "user": { "id": "u1", "username": "someone" }
        }))
        .unwrap()
    }

    fn patch_body(rec: &Scripted) -> String {
        let seen = rec.seen.lock();
        let patch = seen
            .iter()
            .find(|r| r.method == http::Method::PATCH)
            .unwrap();
        String::from_utf8(patch.body.clone().unwrap()).unwrap()
    }

    fn nissa() -> Card {
        serde_json::from_value(json!({
            "name": "Nissa, Worldwaker",
            "manaCost": "{3}{G}{G}",
            "colorIdentity": ["G"],
            "supertypes": ["Legendary"],
            "types": ["Planeswalker"],
            "subtypes": ["Nissa"],
            "rarity": "Mythic",
            "set": "M15",
            "setName": "Magic 2015",
            "text": "+1: Untap up to four target Forests.",
            "loyalty": "3",
            "layout": "normal",
            "multiverseid": 383325
        }))
        .unwrap()
    }

    // -- definitions ---

    #[test]
    fn three_commands_everywhere() {
        let cmds = slash_commands();
        let names: Vec<_> = cmds.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["card_search", "birdfact", "birdfactimage"]);
        for cmd in &cmds {
            assert_eq!(cmd.contexts.as_ref().map(Vec::len), Some(3));
            assert_eq!(cmd.integration_types.as_ref().map(Vec::len), Some(2));
        }
    }

    #[test]
    fn card_search_options() {
        let cmds = slash_commands();
        let options: Vec<_> = cmds[0]
            .options
            .iter()
            .map(|o| (o.name.as_str(), o.kind, o.required))
            .collect();
        assert_eq!(options.len(), 9);
        assert!(options.contains(&("cmc", CommandOptionType::Integer, false)));
        assert!(options.contains(&("multiverseid", CommandOptionType::Integer, false)));
        assert!(options.contains(&("game_format", CommandOptionType::String, false)));
        // Every option maps onto a valid card query key.
        for (name, _, _) in options {
            assert!(CardQuery::new().set(name, "x").is_ok(), "{}", name);
        }
    }

    // -- rendering ---

    #[test]
    fn text_layout_container() {
        let container = card_container(&nissa()).unwrap();
        assert_eq!(container.accent_color, Some(mtg::ManaColor::Green.rgb()));

        let value = serde_json::to_value(&container).unwrap();
        let parts = value["components"].as_array().unwrap();
        assert_eq!(parts[0]["content"], "Nissa, Worldwaker {3}{G}{G}");
        assert_eq!(parts[2]["type"], 9);
        assert_eq!(
            parts[2]["components"][0]["content"],
            "Legendary Planeswalker - Nissa (Mythic)"
        );
        assert_eq!(parts[2]["accessory"]["custom_id"], "SET_Magic 2015");
        assert_eq!(parts[2]["accessory"]["label"], "M15 - Magic 2015");
        assert_eq!(parts[2]["accessory"]["disabled"], true);
        assert_eq!(parts[4]["content"], "+1: Untap up to four target Forests.");
        assert_eq!(parts[6]["content"], "[3]");

        let row = parts.last().unwrap();
        assert_eq!(row["type"], 1);
        assert_eq!(row["components"][0]["url"], PROJECT_URL);
        assert_eq!(row["components"][1]["label"], "Gatherer");
    }

    #[test]
    fn image_only_layout() {
        let card = Card {
            name: Some("Fire // Ice".into()),
            layout: Some("split".into()),
            image_url: Some("https://img/fire.png".into()),
            color_identity: Some(vec!["U".into(), "R".into()]),
            ..Default::default()
        };
        let container = card_container(&card).unwrap();
        assert_eq!(container.accent_color, None);
        assert!(matches!(container.components[0], Component::MediaGallery(_)));
        // GitHub only: no multiverse id.
        match container.components.last().unwrap() {
            Component::ActionRow(row) => assert_eq!(row.components.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn undisplayable_cards() {
        let no_image = Card {
            name: Some("Token".into()),
            layout: Some("token".into()),
            ..Default::default()
        };
        assert!(card_container(&no_image).is_none());
        let no_name = Card {
            layout: Some("normal".into()),
            ..Default::default()
        };
        assert!(card_container(&no_name).is_none());
    }

    #[test]
    fn creature_escapes_stars() {
        let card = Card {
            name: Some("Tarmogoyf".into()),
            layout: Some("normal".into()),
            types: Some(vec!["Creature".into()]),
            power: Some("*".into()),
            toughness: Some("1+*".into()),
            ..Default::default()
        };
        let value = serde_json::to_value(card_container(&card).unwrap()).unwrap();
        let parts = value["components"].as_array().unwrap();
        assert_eq!(parts[2]["content"], "Creature");
        assert_eq!(parts[4]["content"], "(\\*/1+\\*)");
        assert_eq!(value["accent_color"], mtg::card::COLORLESS_RGB);
    }

    #[test]
    fn set_and_animal_containers() {
        let set = Set {
            code: "KTK".into(),
            name: "Khans of Tarkir".into(),
            ..Default::default()
        };
        let value = serde_json::to_value(set_container(&set)).unwrap();
        assert_eq!(
            value["components"][0]["content"],
            "Code: KTK\nName: Khans of Tarkir\nOnline Only: No"
        );

        let animal = Animal {
            image: "https://img/bird.jpg".into(),
            fact: "Birds sing.".into(),
        };
        let value = serde_json::to_value(animal_container(&animal)).unwrap();
        assert_eq!(value["components"][0]["items"][0]["media"]["url"], "https://img/bird.jpg");
        assert_eq!(value["components"][1]["content"], "Birds sing.");
    }

    // -- flows ---

    #[tokio::test]
    async fn card_search_renders_card() {
        let body = json!({ "cards": [serde_json::to_value(nissa()).unwrap()] }).to_string();
        let (ctx, rec) = context(Scripted::new().on("/v1/cards", StatusCode::OK, body));
        let interaction = command(
            "card_search",
            json!([
                { "name": "name", "type": 3, "value": "nissa" },
                { "name": "cmc", "type": 4, "value": 5 }
            ]),
        );
        on_interaction(&ctx, &interaction).await.unwrap();

        assert_eq!(rec.paths(), vec![CALLBACK, "GET /v1/cards", EDIT]);
        let query = rec.seen.lock()[1].url.query().map(str::to_string);
        assert_eq!(query.as_deref(), Some("name=nissa&cmc=5&pageSize=1"));

        let callback = rec.seen.lock()[0].body.clone().unwrap();
        assert_eq!(callback, br#"{"type":5,"data":{"flags":64}}"#.to_vec());

        let edit: serde_json::Value = serde_json::from_str(&patch_body(&rec)).unwrap();
        assert_eq!(edit["flags"], 1 << 15);
        assert_eq!(edit["components"][0]["type"], 17);
    }

    #[tokio::test]
    async fn card_search_without_match() {
        let (ctx, rec) = context(Scripted::new().on("/v1/cards", StatusCode::OK, r#"{"cards":[]}"#));
        on_interaction(&ctx, &command("card_search", json!([]))).await.unwrap();
        let edit: serde_json::Value = serde_json::from_str(&patch_body(&rec)).unwrap();
        assert_eq!(edit["content"], NO_CARD_FOUND);
    }

    #[tokio::test]
    async fn card_search_attaches_unsupported_card() {
        let (ctx, rec) = context(Scripted::new().on(
            "/v1/cards",
            StatusCode::OK,
            r#"{"cards":[{"name":"Goblin Token","layout":"token","power":"1"}]}"#,
        ));
        on_interaction(&ctx, &command("card_search", json!([]))).await.unwrap();

        let body = patch_body(&rec);
        assert!(body.contains(CARD_NOT_SUPPORTED));
        assert!(body.contains("filename=\"card.json\""));
        assert!(body.contains("\"name\": \"Goblin Token\""));
    }

    #[tokio::test]
    async fn card_search_api_failure_reports_and_errors() {
        let (ctx, rec) = context(Scripted::new().on("/v1/cards", StatusCode::SERVICE_UNAVAILABLE, "down"));
        let err = on_interaction(&ctx, &command("card_search", json!([])))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
        let edit: serde_json::Value = serde_json::from_str(&patch_body(&rec)).unwrap();
        assert_eq!(edit["content"], GENERIC_FAILURE);
    }

    #[tokio::test]
    async fn card_search_bad_option_edits_deferred_response() {
        let (ctx, rec) = context(Scripted::new());
        let interaction = command(
            "card_search",
            json!([{ "name": "flavour", "type": 3, "value": "x" }]),
        );
        let err = on_interaction(&ctx, &interaction).await.unwrap_err();
        assert!(err.to_string().contains("flavour"));

        assert_eq!(rec.paths(), vec![CALLBACK, EDIT]);
        let edit: serde_json::Value = serde_json::from_str(&patch_body(&rec)).unwrap();
        assert_eq!(edit["content"], GENERIC_FAILURE);
    }

    #[tokio::test]
    async fn bird_fact_replies_inline() {
        let (ctx, rec) = context(Scripted::new().on(
            "/facts/bird",
            StatusCode::OK,
            r#"{"fact":"Owls can't move their eyes."}"#,
        ));
        on_interaction(&ctx, &command("birdfact", json!([]))).await.unwrap();
        assert_eq!(rec.paths(), vec!["GET /facts/bird", CALLBACK]);
        let body = rec.seen.lock()[1].body.clone().unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["type"], 4);
        assert_eq!(body["data"]["content"], "Owls can't move their eyes.");
    }

    #[tokio::test]
    async fn bird_fact_image_edits_with_container() {
        let (ctx, rec) = context(Scripted::new().on(
            "/animal/bird",
            StatusCode::OK,
            r#"{"image":"https://img/b.jpg","fact":"Tweet."}"#,
        ));
        on_interaction(&ctx, &command("birdfactimage", json!([]))).await.unwrap();
        assert_eq!(rec.paths(), vec![CALLBACK, "GET /animal/bird", EDIT]);
        let edit: serde_json::Value = serde_json::from_str(&patch_body(&rec)).unwrap();
        assert_eq!(edit["components"][0]["components"][1]["content"], "Tweet.");
    }

    #[tokio::test]
    async fn unknown_command_is_ignored() {
        let (ctx, rec) = context(Scripted::new());
        on_interaction(&ctx, &command("roll", json!([]))).await.unwrap();
        assert!(rec.seen.lock().is_empty());
    }
}
